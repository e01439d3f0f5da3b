use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{CreateMessage, HistoryQuery};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use huddle_protocol::MessageData;
use uuid::Uuid;

const DEFAULT_PAGE: i64 = 50;

/// A page of history, ascending by `(created_at, id)`, ending just before
/// the `before` cursor (or at the newest message).
pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(community_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageData>>> {
    state.rooms.resolve_member(community_id, auth.user_id).await?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE)
        .clamp(1, state.config.history_page_limit.max(1));
    let messages = state
        .messages
        .history(community_id, query.before, limit)
        .await?;

    Ok(Json(messages))
}

/// Pinned messages, most recent pin first.
pub async fn list_pins(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(community_id): Path<Uuid>,
) -> Result<Json<Vec<MessageData>>> {
    state.rooms.resolve_member(community_id, auth.user_id).await?;

    let pinned = state.messages.pinned(community_id).await?;
    Ok(Json(pinned))
}

/// Sends through the community's room, exactly like a live `send_message`.
pub async fn create_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(community_id): Path<Uuid>,
    Json(input): Json<CreateMessage>,
) -> Result<Json<MessageData>> {
    let member = state.rooms.resolve_member(community_id, auth.user_id).await?;

    let message = state
        .rooms
        .submit(community_id, &member, &input.content, input.is_announcement)
        .await?;

    Ok(Json(message))
}
