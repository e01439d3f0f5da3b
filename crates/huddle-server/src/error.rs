use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use huddle_protocol::DenialReason;
use serde_json::json;
use thiserror::Error;

/// Outcomes of chat commands that do not succeed.
///
/// Everything except `PersistenceFailure`, `Unavailable`, and `ConnectionOverflow`
/// is a routine refusal: it goes back to the requester and is not logged as a fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("community not found")]
    UnknownCommunity,

    #[error("not a member of this community")]
    NotAMember,

    #[error("chat is disabled in this community")]
    ChatDisabled,

    #[error("your role does not allow this")]
    InsufficientRole,

    #[error("slowmode is active, wait {remaining_seconds}s")]
    SlowmodeActive { remaining_seconds: u64 },

    #[error("invalid message: {0}")]
    Validation(String),

    #[error("message not found")]
    MessageNotFound,

    #[error("message could not be stored: {0}")]
    PersistenceFailure(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("outbound buffer overflow")]
    ConnectionOverflow,

    #[error("room is shutting down")]
    RoomClosed,
}

impl ChatError {
    /// What the requester is told.
    pub fn denial(&self) -> DenialReason {
        match self {
            ChatError::UnknownCommunity => DenialReason::UnknownCommunity,
            ChatError::NotAMember => DenialReason::NotAMember,
            ChatError::ChatDisabled => DenialReason::ChatDisabled,
            ChatError::InsufficientRole => DenialReason::InsufficientRole,
            ChatError::SlowmodeActive { remaining_seconds } => DenialReason::SlowmodeActive {
                remaining_seconds: *remaining_seconds,
            },
            ChatError::Validation(message) => DenialReason::Validation {
                message: message.clone(),
            },
            ChatError::MessageNotFound => DenialReason::MessageNotFound,
            ChatError::PersistenceFailure(_) => DenialReason::PersistenceFailure,
            ChatError::Unavailable(_) | ChatError::ConnectionOverflow | ChatError::RoomClosed => {
                DenialReason::Unavailable
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl From<crate::chat::StoreError> for AppError {
    fn from(err: crate::chat::StoreError) -> Self {
        match err {
            crate::chat::StoreError::Database(e) => AppError::Database(e),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Chat(err) => {
                let status = match err {
                    ChatError::UnknownCommunity | ChatError::MessageNotFound => {
                        StatusCode::NOT_FOUND
                    }
                    ChatError::NotAMember
                    | ChatError::ChatDisabled
                    | ChatError::InsufficientRole => StatusCode::FORBIDDEN,
                    ChatError::SlowmodeActive { .. } => StatusCode::TOO_MANY_REQUESTS,
                    ChatError::Validation(_) => StatusCode::BAD_REQUEST,
                    ChatError::PersistenceFailure(_)
                    | ChatError::Unavailable(_)
                    | ChatError::ConnectionOverflow
                    | ChatError::RoomClosed => StatusCode::SERVICE_UNAVAILABLE,
                };
                let body = Json(json!({
                    "error": err.to_string(),
                    "reason": err.denial(),
                }));
                return (status, body).into_response();
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::Jwt(_) => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
