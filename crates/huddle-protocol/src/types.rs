use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A member's standing within one community.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Moderator,
    Member,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Owner, Role::Moderator, Role::Member];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Moderator => "moderator",
            Role::Member => "member",
        }
    }

    /// Owners and moderators.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Owner | Role::Moderator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown role: {0}")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "moderator" => Ok(Role::Moderator),
            "member" => Ok(Role::Member),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

/// Who may post in a community's chat.
///
/// Values this build does not recognise deserialize to [`ChatMode::Unknown`],
/// which denies every send.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    Disabled,
    OwnerOnly,
    ModeratorsOnly,
    AllMembers,
    #[serde(other)]
    Unknown,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Disabled => "disabled",
            ChatMode::OwnerOnly => "owner_only",
            ChatMode::ModeratorsOnly => "moderators_only",
            ChatMode::AllMembers => "all_members",
            ChatMode::Unknown => "unknown",
        }
    }

    /// Parses a stored mode. Never fails: unrecognised input maps to `Unknown`.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "disabled" => ChatMode::Disabled,
            "owner_only" => ChatMode::OwnerOnly,
            "moderators_only" => ChatMode::ModeratorsOnly,
            "all_members" => ChatMode::AllMembers,
            _ => ChatMode::Unknown,
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-community chat configuration, owned by the community admin surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSettings {
    pub chat_mode: ChatMode,
    pub slowmode_seconds: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            chat_mode: ChatMode::AllMembers,
            slowmode_seconds: 0,
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageData {
    pub id: Uuid,
    pub community_id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    /// Empty once the message is tombstoned.
    pub content: String,
    pub is_announcement: bool,
    pub is_pinned: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl MessageData {
    /// Canonical ordering key within a community.
    pub fn order_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

/// One entry in a room's presence list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceMember {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: Role,
}

/// Why a command was refused. Only ever delivered to the requester.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    NotAMember,
    UnknownCommunity,
    ChatDisabled,
    InsufficientRole,
    SlowmodeActive { remaining_seconds: u64 },
    Validation { message: String },
    MessageNotFound,
    /// The server could not store the message; safe to retry immediately.
    PersistenceFailure,
    /// A backing service was unreachable; safe to retry.
    Unavailable,
}

impl DenialReason {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DenialReason::PersistenceFailure | DenialReason::Unavailable
        )
    }
}

/// A community as seen by one of its members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityData {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub role: Role,
    pub settings: ChatSettings,
    pub created_at: DateTime<Utc>,
}
