pub mod config;
pub mod emitter;
pub mod memory;
pub mod responder;
pub mod sqlite;
