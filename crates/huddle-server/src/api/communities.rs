use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{CommunityInvite, CreateCommunity, CreateInvite, SetMemberRole, UpdateChatSettings};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use huddle_protocol::{ChatSettings, CommunityData};
use uuid::Uuid;

pub async fn create_community(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(input): Json<CreateCommunity>,
) -> Result<Json<CommunityData>> {
    let community = state.community_service.create(auth.user_id, input).await?;
    Ok(Json(community))
}

pub async fn list_communities(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<CommunityData>>> {
    let communities = state.community_service.list_for_user(auth.user_id).await?;
    Ok(Json(communities))
}

pub async fn update_chat_settings(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(community_id): Path<Uuid>,
    Json(input): Json<UpdateChatSettings>,
) -> Result<Json<ChatSettings>> {
    let settings = state
        .community_service
        .update_chat_settings(community_id, auth.user_id, input)
        .await?;
    Ok(Json(settings))
}

pub async fn set_member_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((community_id, user_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<SetMemberRole>,
) -> Result<StatusCode> {
    state
        .community_service
        .set_member_role(community_id, auth.user_id, user_id, input.role)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(community_id): Path<Uuid>,
    input: Option<Json<CreateInvite>>,
) -> Result<Json<CommunityInvite>> {
    let input = input.map(|Json(input)| input).unwrap_or_default();
    let invite = state
        .community_service
        .create_invite(community_id, auth.user_id, input)
        .await?;
    Ok(Json(invite))
}

pub async fn join_community(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
) -> Result<Json<CommunityData>> {
    let community = state
        .community_service
        .join_with_invite(&code, auth.user_id)
        .await?;
    Ok(Json(community))
}
