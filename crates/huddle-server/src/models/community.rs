use chrono::{DateTime, Utc};
use huddle_protocol::{ChatMode, ChatSettings, CommunityData, Role};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A community as seen by one of its members.
#[derive(Debug, Clone, FromRow)]
pub struct CommunityRow {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub chat_mode: String,
    pub slowmode_seconds: i64,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl CommunityRow {
    pub fn settings(&self) -> ChatSettings {
        settings_from_row(&self.chat_mode, self.slowmode_seconds)
    }
}

impl From<CommunityRow> for CommunityData {
    fn from(row: CommunityRow) -> Self {
        let settings = row.settings();
        CommunityData {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            role: role_from_row(&row.role),
            settings,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MemberRow {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: String,
}

/// Stored chat modes this build does not know load as `Unknown`, which
/// denies every send.
pub fn settings_from_row(chat_mode: &str, slowmode_seconds: i64) -> ChatSettings {
    ChatSettings {
        chat_mode: ChatMode::parse_lossy(chat_mode),
        slowmode_seconds: u32::try_from(slowmode_seconds.max(0)).unwrap_or(u32::MAX),
    }
}

pub fn role_from_row(role: &str) -> Role {
    role.parse().unwrap_or(Role::Member)
}

#[derive(Debug, Deserialize)]
pub struct CreateCommunity {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChatSettings {
    pub chat_mode: Option<ChatMode>,
    pub slowmode_seconds: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SetMemberRole {
    pub role: Role,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateInvite {
    pub max_uses: Option<i64>,
}

/// Invite code for joining a community
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CommunityInvite {
    pub code: String,
    pub community_id: Uuid,
    pub created_by: Uuid,
    pub uses: i64,
    pub max_uses: Option<i64>,
    pub created_at: DateTime<Utc>,
}
