use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DenialReason, MessageData, PresenceMember, Role};

/// Messages sent from client to server via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with the server. Must be the first frame.
    Authenticate { token: String },

    /// Post a message to the community chat
    SendMessage {
        content: String,
        #[serde(default)]
        is_announcement: bool,
    },

    /// Typing indicator ping. `false` is advisory; the server expires pings on its own.
    SetTyping { is_typing: bool },

    /// Pin or unpin a message
    Pin { message_id: Uuid, pinned: bool },

    /// Tombstone a message
    Delete { message_id: Uuid },

    /// Ping to keep connection alive
    Ping,
}

/// Messages sent from server to client via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication successful
    Authenticated {
        session_id: Uuid,
        user_id: Uuid,
        role: Role,
    },

    /// Sent once to a session after it joins the room
    Joined {
        community_id: Uuid,
        presence: Vec<PresenceMember>,
        typing: Vec<Uuid>,
        pinned: Vec<Uuid>,
    },

    /// Current presence list of the room
    Presence {
        community_id: Uuid,
        members: Vec<PresenceMember>,
    },

    /// Current set of users typing
    Typing {
        community_id: Uuid,
        user_ids: Vec<Uuid>,
    },

    /// New message persisted
    MessageCreated { message: MessageData },

    /// Message pinned, unpinned, or tombstoned
    MessageUpdated { message: MessageData },

    /// A command from this session was refused
    Denied { reason: DenialReason },

    /// Protocol-level error
    Error { message: String },

    /// Pong response to ping
    Pong,
}
