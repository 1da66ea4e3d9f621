//! Admin-service HTTP client.
//!
//! The admin service is an external REST API the gateway consults for
//! world-level knowledge: moderation, member lookups, tag lists, and OAuth
//! token refreshes. The core sees only the [`AdminService`] trait; tests
//! plug in a canned implementation.

use crate::error::GatewayError;
use async_trait::async_trait;
use pusher_protocol::client::Member;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A player report filed by another player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReport {
    pub reported_user_uuid: String,
    pub reporter_user_uuid: String,
    pub report_comment: String,
    pub room_url: String,
}

/// Result of an OAuth token refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OauthRefresh {
    pub token: String,
    pub message: String,
}

/// Chat member listing with its total count (the listing may be truncated).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMemberList {
    pub members: Vec<Member>,
    pub total: u32,
}

/// The REST surface the core depends on.
#[async_trait]
pub trait AdminService: Send + Sync + std::fmt::Debug {
    async fn report_player(&self, report: PlayerReport) -> Result<(), GatewayError>;
    async fn ban_user_by_uuid(
        &self,
        uuid: &str,
        room_url: &str,
        name: &str,
        message: &str,
        by_user_uuid: &str,
    ) -> Result<(), GatewayError>;
    async fn tags_list(&self, room_url: &str) -> Result<Vec<String>, GatewayError>;
    async fn rooms_from_same_world(&self, room_url: &str) -> Result<Vec<String>, GatewayError>;
    async fn search_members(&self, play_uri: &str, search: &str)
        -> Result<Vec<Member>, GatewayError>;
    async fn search_tags(&self, play_uri: &str, search: &str) -> Result<Vec<String>, GatewayError>;
    async fn get_member(&self, uuid: &str) -> Result<Member, GatewayError>;
    async fn world_chat_members(
        &self,
        play_uri: &str,
        search: &str,
    ) -> Result<ChatMemberList, GatewayError>;
    async fn update_chat_id(&self, uuid: &str, chat_id: &str) -> Result<(), GatewayError>;
    async fn refresh_oauth_token(&self, token: &str) -> Result<OauthRefresh, GatewayError>;
}

/// Production implementation over HTTP.
#[derive(Debug)]
pub struct HttpAdminService {
    base_url: String,
    api_token: String,
    http: reqwest::Client,
}

impl HttpAdminService {
    pub fn new(base_url: String, api_token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GatewayError> {
        debug!("Admin GET {path}");
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_token)
            .query(query)
            .send()
            .await
            .map_err(|e| GatewayError::AdminService(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::AdminService(format!(
                "{path} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| GatewayError::AdminService(e.to_string()))
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<(), GatewayError> {
        debug!("Admin POST {path}");
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::AdminService(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::AdminService(format!(
                "{path} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AdminService for HttpAdminService {
    async fn report_player(&self, report: PlayerReport) -> Result<(), GatewayError> {
        self.post_json("/api/report", &report).await
    }

    async fn ban_user_by_uuid(
        &self,
        uuid: &str,
        room_url: &str,
        name: &str,
        message: &str,
        by_user_uuid: &str,
    ) -> Result<(), GatewayError> {
        self.post_json(
            "/api/ban",
            &serde_json::json!({
                "uuidToBan": uuid,
                "playUri": room_url,
                "name": name,
                "message": message,
                "byUserUuid": by_user_uuid,
            }),
        )
        .await
    }

    async fn tags_list(&self, room_url: &str) -> Result<Vec<String>, GatewayError> {
        self.get_json("/api/room/tags", &[("roomUrl", room_url)]).await
    }

    async fn rooms_from_same_world(&self, room_url: &str) -> Result<Vec<String>, GatewayError> {
        self.get_json("/api/room/sameWorld", &[("roomUrl", room_url)])
            .await
    }

    async fn search_members(
        &self,
        play_uri: &str,
        search: &str,
    ) -> Result<Vec<Member>, GatewayError> {
        self.get_json(
            "/api/members/search",
            &[("playUri", play_uri), ("searchText", search)],
        )
        .await
    }

    async fn search_tags(&self, play_uri: &str, search: &str) -> Result<Vec<String>, GatewayError> {
        self.get_json(
            "/api/tags/search",
            &[("playUri", play_uri), ("searchText", search)],
        )
        .await
    }

    async fn get_member(&self, uuid: &str) -> Result<Member, GatewayError> {
        self.get_json("/api/members", &[("uuid", uuid)]).await
    }

    async fn world_chat_members(
        &self,
        play_uri: &str,
        search: &str,
    ) -> Result<ChatMemberList, GatewayError> {
        self.get_json(
            "/api/world/chatMembers",
            &[("playUri", play_uri), ("searchText", search)],
        )
        .await
    }

    async fn update_chat_id(&self, uuid: &str, chat_id: &str) -> Result<(), GatewayError> {
        self.post_json(
            "/api/members/chatId",
            &serde_json::json!({ "uuid": uuid, "chatId": chat_id }),
        )
        .await
    }

    async fn refresh_oauth_token(&self, token: &str) -> Result<OauthRefresh, GatewayError> {
        self.get_json("/api/oauth/refreshToken", &[("token", token)])
            .await
    }
}
