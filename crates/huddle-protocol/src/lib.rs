//! Wire types shared by the Huddle server and its clients.

mod messages;
mod types;

pub use messages::{ClientMessage, ServerMessage};
pub use types::*;
