pub mod community;
pub mod message;
pub mod user;
