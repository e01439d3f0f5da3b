//! Talking to a Huddle server: REST calls and the live per-community socket.

mod api;
mod websocket;

pub use api::{ApiClient, AuthSession, InviteResponse};
pub use websocket::{LiveConnection, TypingThrottle};
