//! REST adapter over `reqwest`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use archevault_types::api::{
    CreateRoomRequest, EditMessageRequest, InviteRequest, PinMessageRequest, SendMessageRequest,
    ToggleReactionRequest, ToggleReactionResponse, UpdateUserRequest, VerifyRequest,
    VerifyResponse,
};
use archevault_types::models::{Message, PresenceStatus, Room, Thread, User};
use archevault_types::profile::Profile;

use crate::backend::ChatBackend;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::UserDirectory;

pub struct HttpBackend {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: config.api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base, path))
            .bearer_auth(&self.token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.request(Method::GET, path).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self.request(method, path).json(body).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    /// `None` when the wallet has no profile yet.
    pub async fn get_profile(&self, address: &str) -> Result<Option<Profile>> {
        let resp = self
            .request(Method::GET, &format!("/profiles/{}", address))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(resp).await?.json().await?))
    }

    pub async fn put_profile(&self, profile: &Profile) -> Result<Profile> {
        let path = format!("/profiles/{}", profile.wallet_address);
        self.send_json(Method::PUT, &path, profile).await
    }

    pub async fn me(&self) -> Result<User> {
        self.get("/users/me").await
    }
}

/// Exchanges a signed challenge for a session. Rejections come back as a
/// normal response with `authorized == false` and a reason code.
pub async fn verify_wallet(config: &ClientConfig, req: &VerifyRequest) -> Result<VerifyResponse> {
    let resp = reqwest::Client::new()
        .post(format!("{}/auth/verify", config.api_url.trim_end_matches('/')))
        .json(req)
        .send()
        .await?;
    let status = resp.status();
    let text = resp.text().await?;
    match serde_json::from_str::<VerifyResponse>(&text) {
        Ok(body) => Ok(body),
        Err(_) => Err(ClientError::Api {
            status: status.as_u16(),
            message: text,
        }),
    }
}

async fn check(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    Err(ClientError::Api { status, message })
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.get("/rooms").await
    }

    async fn create_room(&self, name: &str, is_private: bool) -> Result<Room> {
        let body = CreateRoomRequest {
            name: name.to_string(),
            is_private,
            is_voice: false,
        };
        self.send_json(Method::POST, "/rooms", &body).await
    }

    async fn invite(&self, room_id: Uuid, user_id: Uuid) -> Result<Room> {
        let path = format!("/rooms/{}/invite", room_id);
        self.send_json(Method::POST, &path, &InviteRequest { user_id })
            .await
    }

    async fn fetch_messages(
        &self,
        room_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        let resp = self
            .request(Method::GET, &format!("/rooms/{}/messages", room_id))
            .query(&query)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn send_message(
        &self,
        room_id: Uuid,
        content: &str,
        thread_id: Option<Uuid>,
    ) -> Result<Message> {
        let body = SendMessageRequest {
            content: content.to_string(),
            parent_id: None,
            thread_id,
        };
        let path = format!("/rooms/{}/messages", room_id);
        self.send_json(Method::POST, &path, &body).await
    }

    async fn edit_message(&self, room_id: Uuid, message_id: Uuid, content: &str) -> Result<Message> {
        let body = EditMessageRequest {
            content: content.to_string(),
        };
        let path = format!("/rooms/{}/messages/{}", room_id, message_id);
        self.send_json(Method::PATCH, &path, &body).await
    }

    async fn delete_message(&self, room_id: Uuid, message_id: Uuid) -> Result<()> {
        let resp = self
            .request(
                Method::DELETE,
                &format!("/rooms/{}/messages/{}", room_id, message_id),
            )
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn pin_message(&self, room_id: Uuid, message_id: Uuid, pinned: bool) -> Result<Message> {
        let path = format!("/rooms/{}/messages/{}/pin", room_id, message_id);
        self.send_json(Method::POST, &path, &PinMessageRequest { pinned })
            .await
    }

    async fn toggle_reaction(
        &self,
        room_id: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<ToggleReactionResponse> {
        let body = ToggleReactionRequest {
            emoji: emoji.to_string(),
        };
        let path = format!("/rooms/{}/messages/{}/reactions", room_id, message_id);
        self.send_json(Method::POST, &path, &body).await
    }

    async fn fetch_thread(&self, room_id: Uuid, parent_id: Uuid) -> Result<Thread> {
        self.get(&format!("/rooms/{}/threads/{}", room_id, parent_id))
            .await
    }

    async fn set_presence(&self, status: PresenceStatus) -> Result<User> {
        let body = UpdateUserRequest {
            status: Some(status),
            ..Default::default()
        };
        self.send_json(Method::PATCH, "/users/me", &body).await
    }
}

#[async_trait]
impl UserDirectory for HttpBackend {
    async fn user_by_wallet(&self, address: &str) -> Result<Option<User>> {
        let resp = self
            .request(Method::GET, &format!("/users/by-wallet/{}", address))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(resp).await?.json().await?))
    }
}
