pub mod community;
pub mod message;
pub mod user;

pub use community::*;
pub use message::*;
pub use user::*;
