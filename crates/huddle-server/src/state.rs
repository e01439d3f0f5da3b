use crate::chat::{ChatConfig, CommunityDirectory, MessagePipeline, MessageStore, RoomRegistry};
use crate::services::{community::CommunityService, message::SqlMessageStore, user::UserService};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub max_message_length: usize,
    pub room_linger_secs: u64,
    pub typing_expiry_ms: u64,
    pub typing_sweep_ms: u64,
    pub typing_throttle_ms: u64,
    pub outbound_queue_capacity: usize,
    pub room_command_capacity: usize,
    pub slowmode_exempt_staff: bool,
    pub history_page_limit: i64,
    pub log_format: String,
}

const DEV_JWT_SECRET: &str = "dev-secret-change-in-production";

impl Config {
    /// Load from environment variables (and `.env`, if the caller loaded one).
    pub fn load() -> anyhow::Result<Self> {
        let config: Config = config::Config::builder()
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("database_url", "sqlite:huddle.db?mode=rwc")?
            .set_default("jwt_secret", DEV_JWT_SECRET)?
            .set_default("max_message_length", 2000)?
            .set_default("room_linger_secs", 30)?
            .set_default("typing_expiry_ms", 2000)?
            .set_default("typing_sweep_ms", 500)?
            .set_default("typing_throttle_ms", 1000)?
            .set_default("outbound_queue_capacity", 256)?
            .set_default("room_command_capacity", 1024)?
            .set_default("slowmode_exempt_staff", false)?
            .set_default("history_page_limit", 100)?
            .set_default("log_format", "pretty")?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    /// The subset of settings the chat engine runs on.
    pub fn chat(&self) -> ChatConfig {
        ChatConfig {
            max_message_length: self.max_message_length,
            room_linger: Duration::from_secs(self.room_linger_secs),
            typing_expiry: Duration::from_millis(self.typing_expiry_ms),
            typing_sweep_interval: Duration::from_millis(self.typing_sweep_ms),
            typing_throttle: Duration::from_millis(self.typing_throttle_ms),
            outbound_queue_capacity: self.outbound_queue_capacity,
            room_command_capacity: self.room_command_capacity,
            slowmode_exempt_staff: self.slowmode_exempt_staff,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: SqlitePool,
    pub rooms: RoomRegistry,
    pub user_service: UserService,
    pub community_service: CommunityService,
    pub messages: Arc<dyn MessageStore>,
}

impl AppState {
    pub fn new(config: Config, db: SqlitePool) -> Self {
        let user_service = UserService::new(db.clone());
        let community_service = CommunityService::new(db.clone());
        let messages: Arc<dyn MessageStore> = Arc::new(SqlMessageStore::new(db.clone()));
        let directory: Arc<dyn CommunityDirectory> = Arc::new(community_service.clone());

        let chat = config.chat();
        let pipeline = Arc::new(MessagePipeline::new(
            messages.clone(),
            chat.max_message_length,
        ));
        let rooms = RoomRegistry::new(directory, pipeline, chat);

        Self {
            config,
            db,
            rooms,
            user_service,
            community_service,
            messages,
        }
    }
}
