pub mod branches;
pub mod conversations;
pub mod shared;
