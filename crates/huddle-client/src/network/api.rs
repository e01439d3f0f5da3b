use anyhow::Result;
use chrono::{DateTime, Utc};
use huddle_protocol::{ChatSettings, CommunityData, MessageData};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Thin wrapper over the server's REST routes.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

/// Issued by register and login.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct InviteResponse {
    pub code: String,
    pub community_id: Uuid,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The WebSocket URL for a community's live connection.
    pub fn live_url(&self, community_id: Uuid) -> String {
        let ws = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/ws/communities/{}", ws, community_id)
    }

    // Auth

    /// Creates an account and keeps the issued token for later calls.
    pub async fn register(
        &mut self,
        username: &str,
        display_name: &str,
        password: &str,
    ) -> Result<AuthSession> {
        let session: AuthSession = self
            .post(
                "/api/auth/register",
                &json!({ "username": username, "display_name": display_name, "password": password }),
            )
            .await?;
        self.token = Some(session.token.clone());
        Ok(session)
    }

    /// Logs in and keeps the issued token for later calls.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<AuthSession> {
        let session: AuthSession = self
            .post(
                "/api/auth/login",
                &json!({ "username": username, "password": password }),
            )
            .await?;
        self.token = Some(session.token.clone());
        Ok(session)
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    // Communities

    pub async fn communities(&self) -> Result<Vec<CommunityData>> {
        self.get("/api/communities").await
    }

    pub async fn create_community(&self, name: &str) -> Result<CommunityData> {
        self.post("/api/communities", &json!({ "name": name })).await
    }

    pub async fn create_invite(&self, community_id: Uuid) -> Result<InviteResponse> {
        self.post(&format!("/api/communities/{}/invites", community_id), &json!({}))
            .await
    }

    pub async fn join(&self, invite_code: &str) -> Result<CommunityData> {
        self.post(&format!("/api/invites/{}", invite_code), &json!({}))
            .await
    }

    pub async fn update_chat_settings(&self, community_id: Uuid, settings: ChatSettings) -> Result<ChatSettings> {
        self.send(
            self.client
                .patch(self.url(&format!("/api/communities/{}/chat", community_id)))
                .json(&settings),
        )
        .await
    }

    // Messages

    /// A history page, ascending by `(created_at, id)`.
    pub async fn history(
        &self,
        community_id: Uuid,
        before: Option<Uuid>,
        limit: Option<i64>,
    ) -> Result<Vec<MessageData>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        self.send(
            self.client
                .get(self.url(&format!("/api/communities/{}/messages", community_id)))
                .query(&query),
        )
        .await
    }

    pub async fn pins(&self, community_id: Uuid) -> Result<Vec<MessageData>> {
        self.get(&format!("/api/communities/{}/pins", community_id))
            .await
    }

    /// Sends without a live connection. The server routes this through the
    /// same room as a live send, so it is checked and broadcast identically.
    pub async fn submit(&self, community_id: Uuid, content: &str, is_announcement: bool) -> Result<MessageData> {
        self.post(
            &format!("/api/communities/{}/messages", community_id),
            &json!({ "content": content, "is_announcement": is_announcement }),
        )
        .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.client.get(self.url(path))).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.client.post(self.url(path)).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, mut request: reqwest::RequestBuilder) -> Result<T> {
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Request failed with status {}: {}", status, text);
        }

        Ok(response.json().await?)
    }
}
