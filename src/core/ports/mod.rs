pub mod emitter;
pub mod responder;
pub mod store;
