pub mod closure;
pub mod error;
pub mod layout;
pub mod model;
pub mod path;
pub mod ports;
pub mod session;
pub mod tree;
