//! The real-time chat engine.
//!
//! One [`room`] task per community owns that community's live state and processes
//! its commands strictly in arrival order. The [`registry`] finds or creates those
//! tasks. Sends pass through [`permissions`] and then the [`pipeline`], which
//! stamps and stores the message before the room broadcasts it.

pub mod permissions;
pub mod pipeline;
pub mod registry;
pub mod room;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

use huddle_protocol::{PresenceMember, Role};
use std::time::Duration;
use uuid::Uuid;

pub use pipeline::MessagePipeline;
pub use registry::RoomRegistry;
pub use room::RoomHandle;
pub use store::{CommunityDirectory, MessageStore, StoreError};

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub max_message_length: usize,
    pub room_linger: Duration,
    pub typing_expiry: Duration,
    pub typing_sweep_interval: Duration,
    pub typing_throttle: Duration,
    pub outbound_queue_capacity: usize,
    pub room_command_capacity: usize,
    pub slowmode_exempt_staff: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 2000,
            room_linger: Duration::from_secs(30),
            typing_expiry: Duration::from_secs(2),
            typing_sweep_interval: Duration::from_millis(500),
            typing_throttle: Duration::from_secs(1),
            outbound_queue_capacity: 256,
            room_command_capacity: 1024,
            slowmode_exempt_staff: false,
        }
    }
}

/// A resolved community member.
///
/// The role is looked up once when a session opens and is not refreshed while
/// the session lives; a demotion applies from the member's next connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: Uuid,
    pub role: Role,
    pub display_name: String,
}

impl Member {
    pub fn presence(&self) -> PresenceMember {
        PresenceMember {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            role: self.role,
        }
    }
}
