//! Room REST operations used by the sessions.

use serde::Deserialize;
use serde_json::json;

use crate::api::{ApiError, ApiResponse, ApiTransport};
use crate::http::RequestOptions;

/// Room owner as returned by the room endpoints.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RoomAuthor {
    pub id: u64,
    #[serde(default)]
    pub nickname: String,
}

/// Connection endpoints advertised by a room.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RoomSystem {
    #[serde(default)]
    pub protocol: String,
    /// Dedicated socket server for the legacy protocol.
    #[serde(default)]
    pub server: String,
}

/// Room metadata snapshot from `GET /lives/{id}/`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Room {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: RoomAuthor,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub total_member_count: u32,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub donation_total: u64,
    #[serde(default)]
    pub is_call: bool,
    #[serde(default)]
    pub is_mute: bool,
    #[serde(default)]
    pub is_freeze: bool,
    #[serde(default)]
    pub welcome_message: String,
    #[serde(default)]
    pub manager_ids: Vec<u64>,
    /// Gateway channel key.
    #[serde(default)]
    pub stream_name: String,
    #[serde(default)]
    pub system: RoomSystem,
}

/// Room-scoped credential from `POST /lives/{id}/token/`.
#[derive(Clone, Debug, Deserialize)]
pub struct RoomToken {
    pub jwt: String,
}

/// Thin typed wrapper over the room endpoints.
#[derive(Clone)]
pub struct RoomApi {
    api: ApiTransport,
}

impl RoomApi {
    pub fn new(api: ApiTransport) -> Self {
        Self { api }
    }

    /// Fetches the room metadata snapshot.
    pub async fn info(&self, room_id: u64) -> Result<Option<Room>, ApiError> {
        let response: ApiResponse<Room> = self
            .api
            .request(&format!("/lives/{room_id}/"), RequestOptions::get())
            .await?;
        Ok(response.into_first())
    }

    /// Issues a room-scoped token for this device.
    pub async fn token(&self, room_id: u64, device_id: &str) -> Result<Option<RoomToken>, ApiError> {
        let response: ApiResponse<RoomToken> = self
            .api
            .request(
                &format!("/lives/{room_id}/token/"),
                RequestOptions::post().json(json!({"device_unique_id": device_id})),
            )
            .await?;
        Ok(response.into_first())
    }

    /// Closes a room owned by the signed-in user.
    pub async fn close(&self, room_id: u64) -> Result<(), ApiError> {
        self.api
            .request::<serde_json::Value>(
                &format!("/lives/{room_id}/close/"),
                RequestOptions::post().json(json!({"is_save": false})),
            )
            .await?;
        Ok(())
    }

    /// First page of the popular-rooms listing; follow `next` for more.
    pub async fn popular(&self, page_size: u32) -> Result<ApiResponse<Room>, ApiError> {
        self.api
            .request(
                "/lives/popular/",
                RequestOptions::get().query("page_size", page_size),
            )
            .await
    }

    /// Next page of a listing, using the envelope's absolute URL.
    pub async fn next_page(
        &self,
        page: &ApiResponse<Room>,
    ) -> Result<Option<ApiResponse<Room>>, ApiError> {
        if !page.has_next() {
            return Ok(None);
        }
        self.api.follow(&page.next).await.map(Some)
    }
}
