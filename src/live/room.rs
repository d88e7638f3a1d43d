//! Room sessions: bind a socket session to one active room.
//!
//! [`LiveSession`] speaks the legacy protocol over a dedicated socket opened
//! against the room's own server; [`ChannelSession`] speaks the gateway
//! protocol over the facade's shared socket, scoped to one channel. Both
//! fetch a room-scoped token, mirror it onto the REST transports, fold
//! partial updates into [`RoomState`] and stamp the moderator flag onto
//! every event actor.

use std::sync::{Arc, RwLock};

use reqwest::header::{HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiTransport};
use crate::auth::Credential;
use crate::http::RequestOptions;
use crate::live::api::{Room, RoomApi};
use crate::live::event::{EventEnvelope, EventKind, EventPayload, RoomState};
use crate::live::socket::{SocketError, SocketSession};
use crate::live::{legacy, v2};

/// Wire budget for one outbound chat message, in characters.
pub const MESSAGE_CHUNK_BUDGET: usize = 200;

/// Room-scoped credential header mirrored onto the REST transports.
const ROOM_AUTH_HEADER: HeaderName = HeaderName::from_static("x-live-authorization");

/// Errors produced by the room sessions.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Socket(#[from] SocketError),

    /// Room metadata could not be obtained; not retriable.
    #[error("room {0} not found")]
    RoomNotFound(u64),

    /// The platform declined to issue a room-scoped token.
    #[error("room token was not issued for room {0}")]
    RoomTokenRejected(u64),

    /// The operation requires a signed-in facade.
    #[error("not signed in")]
    NotSignedIn,

    /// The operation requires a successfully joined room.
    #[error("no room joined")]
    NotJoined,
}

/// Pieces of the facade each room session needs, passed at construction.
pub(crate) struct RoomContext {
    pub(crate) rooms: RoomApi,
    pub(crate) api: ApiTransport,
    pub(crate) gateway: ApiTransport,
    pub(crate) credential: Arc<RwLock<Option<Credential>>>,
    pub(crate) app_version: String,
    pub(crate) user_agent: String,
}

impl RoomContext {
    fn credential_snapshot(&self) -> Result<Credential, LiveError> {
        self.credential
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or(LiveError::NotSignedIn)
    }

    fn attach_room_header(&self, jwt: &str) -> Result<(), LiveError> {
        let value = HeaderValue::from_str(&format!("Bearer {jwt}"))
            .map_err(|_| LiveError::NotSignedIn)?;
        self.api
            .http()
            .set_default_header(ROOM_AUTH_HEADER, value.clone());
        self.gateway.http().set_default_header(ROOM_AUTH_HEADER, value);
        Ok(())
    }

    fn clear_room_header(&self) {
        self.api.http().remove_default_header(&ROOM_AUTH_HEADER);
        self.gateway.http().remove_default_header(&ROOM_AUTH_HEADER);
    }
}

type SharedRoomState = Arc<RwLock<Option<RoomState>>>;

fn room_state(room: &Room, jwt: &str) -> RoomState {
    RoomState {
        id: room.id,
        channel: room.stream_name.clone(),
        title: room.title.clone(),
        author_id: room.author.id,
        member_count: room.member_count,
        total_member_count: room.total_member_count,
        like_count: room.like_count,
        donation_total: room.donation_total,
        is_call: room.is_call,
        is_mute: room.is_mute,
        is_freeze: room.is_freeze,
        welcome_message: room.welcome_message.clone(),
        moderator_ids: room.manager_ids.clone(),
        room_token: SecretString::new(jwt.to_string()),
    }
}

/// Pre-hook stamping the moderator flag onto any event actor, from the
/// current moderator-id list. False when no room is joined or the list is
/// empty.
fn stamp_moderators(
    state: SharedRoomState,
    channel: Option<String>,
) -> impl FnMut(&mut EventEnvelope) + Send {
    move |envelope| {
        if channel.is_some() && envelope.channel != channel {
            return;
        }
        if let Some(user) = envelope.payload.user_mut() {
            user.is_moderator = state
                .read()
                .ok()
                .and_then(|room| room.as_ref().map(|room| room.is_moderator(user.id)))
                .unwrap_or(false);
        }
    }
}

/// Standing listener folding every room-update event into the snapshot.
fn fold_updates(
    state: SharedRoomState,
    channel: Option<String>,
) -> impl FnMut(&EventEnvelope) + Send {
    move |envelope| {
        if channel.is_some() && envelope.channel != channel {
            return;
        }
        if let EventPayload::Update(update) = &envelope.payload {
            if let Ok(mut slot) = state.write() {
                if let Some(room) = slot.as_mut() {
                    room.apply(&update.patch);
                }
            }
        }
    }
}

/// Splits a chat message into wire-sized chunks.
///
/// Consecutive lines pack together up to `budget` characters; a line is
/// never split across chunks unless it alone exceeds the budget, in which
/// case it hard-splits at the boundary. Whitespace-only chunks are dropped.
fn chunk_message(text: &str, budget: usize) -> Vec<String> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for (index, line) in lines.iter().enumerate() {
        let mut piece = (*line).to_string();
        if index < lines.len() - 1 {
            piece.push('\n');
        }
        let piece_len = piece.chars().count();

        if current_len + piece_len > budget {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if piece_len > budget {
                let mut run = String::new();
                let mut run_len = 0usize;
                for ch in piece.chars() {
                    run.push(ch);
                    run_len += 1;
                    if run_len == budget {
                        chunks.push(std::mem::take(&mut run));
                        run_len = 0;
                    }
                }
                if !run.is_empty() {
                    chunks.push(run);
                }
            } else {
                current = piece;
                current_len = piece_len;
            }
        } else {
            current.push_str(&piece);
            current_len += piece_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .collect()
}

/// Legacy-protocol room session over a dedicated socket.
pub struct LiveSession {
    context: RoomContext,
    socket: SocketSession,
    state: SharedRoomState,
}

impl LiveSession {
    pub(crate) fn new(context: RoomContext, socket: SocketSession) -> Self {
        Self {
            context,
            socket,
            state: Arc::new(RwLock::new(None)),
        }
    }

    /// The dedicated socket session, for event subscription.
    pub fn socket(&self) -> &SocketSession {
        &self.socket
    }

    /// Snapshot of the joined room, if any.
    pub fn room(&self) -> Option<RoomState> {
        self.state.read().ok().and_then(|slot| slot.clone())
    }

    /// Joins a room: fetches metadata and a room token, connects the
    /// dedicated socket, then runs the join handshake in strict order
    /// (state round-trip, join round-trip, ranking request).
    pub async fn join(&self, room_id: u64) -> Result<(), LiveError> {
        let credential = self.context.credential_snapshot()?;

        let room = self
            .context
            .rooms
            .info(room_id)
            .await
            .map_err(|error| match error {
                ApiError::Status { .. } => LiveError::RoomNotFound(room_id),
                other => LiveError::Api(other),
            })?
            .ok_or(LiveError::RoomNotFound(room_id))?;
        let token = self
            .context
            .rooms
            .token(room_id, &credential.device_id)
            .await?
            .ok_or(LiveError::RoomTokenRejected(room_id))?;

        let url = with_token_param(
            &room.system.server,
            credential.access_token.expose_secret(),
        );
        self.socket.connect(&url).await?;

        self.socket
            .send_and_wait(
                legacy::state_request(
                    room_id,
                    credential.user_id,
                    &self.context.app_version,
                    &self.context.user_agent,
                ),
                EventKind::State,
                None,
            )
            .await?;
        self.socket
            .send_and_wait(
                legacy::join_request(
                    room_id,
                    &token.jwt,
                    &self.context.app_version,
                    &self.context.user_agent,
                ),
                EventKind::Join,
                None,
            )
            .await?;
        self.socket.send(legacy::ranklist_request(
            room_id,
            credential.user_id,
            &self.context.user_agent,
        ));

        self.context.attach_room_header(&token.jwt)?;

        if let Ok(mut slot) = self.state.write() {
            *slot = Some(room_state(&room, &token.jwt));
        }
        self.socket.on(
            EventKind::Update,
            fold_updates(Arc::clone(&self.state), None),
        );
        self.socket
            .on_before(stamp_moderators(Arc::clone(&self.state), None));

        info!(room_id, "joined room");
        Ok(())
    }

    /// Sends a chat message, fragmenting it to the wire budget. Requires a
    /// successful join.
    pub fn message(&self, text: &str) -> Result<(), LiveError> {
        let room = self.room().ok_or(LiveError::NotJoined)?;
        for chunk in chunk_message(text, MESSAGE_CHUNK_BUDGET) {
            self.socket.send(legacy::message_report(
                &chunk,
                room.room_token.expose_secret(),
                &self.context.app_version,
                &self.context.user_agent,
            ));
        }
        Ok(())
    }

    /// Leaves the room. The room is closed server-side only when the local
    /// user owns it and `skip_server_close` is unset; local state and the
    /// room-scoped headers are cleared regardless of that call's outcome.
    pub async fn close(&self, skip_server_close: bool) -> Result<(), LiveError> {
        let Some(room) = self.room() else {
            self.socket.disconnect();
            return Ok(());
        };

        self.socket.send(legacy::leave_report(
            room.id,
            room.room_token.expose_secret(),
            &self.context.app_version,
            &self.context.user_agent,
        ));

        let mut server_close = Ok(());
        let owns_room = self
            .context
            .credential_snapshot()
            .map(|credential| credential.user_id == room.author_id)
            .unwrap_or(false);
        if owns_room && !skip_server_close {
            server_close = self.context.rooms.close(room.id).await;
            if let Err(error) = &server_close {
                warn!(%error, room_id = room.id, "server-side room close failed");
            }
        }

        if let Ok(mut slot) = self.state.write() {
            *slot = None;
        }
        self.context.clear_room_header();
        self.socket.disconnect();
        debug!(room_id = room.id, "room session closed");

        server_close.map_err(LiveError::Api)
    }
}

/// Gateway-protocol room session over the facade's shared socket.
pub struct ChannelSession {
    context: RoomContext,
    socket: SocketSession,
    gateway_socket: String,
    state: SharedRoomState,
}

impl ChannelSession {
    pub(crate) fn new(
        context: RoomContext,
        socket: SocketSession,
        gateway_socket: String,
    ) -> Self {
        Self {
            context,
            socket,
            gateway_socket,
            state: Arc::new(RwLock::new(None)),
        }
    }

    /// The shared socket session, for event subscription.
    pub fn socket(&self) -> &SocketSession {
        &self.socket
    }

    pub fn room(&self) -> Option<RoomState> {
        self.state.read().ok().and_then(|slot| slot.clone())
    }

    /// Channel key of the joined room.
    pub fn channel(&self) -> Option<String> {
        self.room().map(|room| room.channel)
    }

    /// Joins a room: fetches a room token and metadata, reuses (or opens)
    /// the shared socket, and activates the room's channel with one
    /// fire-and-forget command.
    pub async fn join(&self, room_id: u64) -> Result<(), LiveError> {
        let credential = self.context.credential_snapshot()?;

        let token = self
            .context
            .rooms
            .token(room_id, &credential.device_id)
            .await?
            .ok_or(LiveError::RoomTokenRejected(room_id))?;
        let room = self
            .context
            .rooms
            .info(room_id)
            .await
            .map_err(|error| match error {
                ApiError::Status { .. } => LiveError::RoomNotFound(room_id),
                other => LiveError::Api(other),
            })?
            .filter(|room| !room.stream_name.is_empty())
            .ok_or(LiveError::RoomNotFound(room_id))?;

        if !self.socket.is_connected() {
            let url = with_token_param(
                &self.gateway_socket,
                credential.access_token.expose_secret(),
            );
            self.socket.connect(&url).await?;
        }

        self.socket
            .send(v2::activate_channel(&room.stream_name, &token.jwt));

        self.context.attach_room_header(&token.jwt)?;

        let channel = room.stream_name.clone();
        if let Ok(mut slot) = self.state.write() {
            *slot = Some(room_state(&room, &token.jwt));
        }
        self.socket.on(
            EventKind::Update,
            fold_updates(Arc::clone(&self.state), Some(channel.clone())),
        );
        self.socket
            .on_before(stamp_moderators(Arc::clone(&self.state), Some(channel)));

        info!(room_id, channel = %room.stream_name, "channel activated");
        Ok(())
    }

    /// Sends a chat message through the gateway chat endpoint, one request
    /// per wire-sized chunk, in order. Requires a successful join.
    pub async fn message(&self, text: &str) -> Result<(), LiveError> {
        let room = self.room().ok_or(LiveError::NotJoined)?;
        for chunk in chunk_message(text, MESSAGE_CHUNK_BUDGET) {
            self.context
                .gateway
                .request::<serde_json::Value>(
                    &format!("/lives/{}/chat/message", room.channel),
                    RequestOptions::post().json(json!({
                        "message": chunk,
                        "messageType": "GENERAL_MESSAGE",
                    })),
                )
                .await?;
        }
        Ok(())
    }

    /// Deactivates the channel, keeping the shared socket open. Server-side
    /// close and cleanup follow the same rules as the legacy session.
    pub async fn close(&self, skip_server_close: bool) -> Result<(), LiveError> {
        let Some(room) = self.room() else {
            return Ok(());
        };

        self.socket.send(v2::deactivate_channel(&room.channel));

        let mut server_close = Ok(());
        let owns_room = self
            .context
            .credential_snapshot()
            .map(|credential| credential.user_id == room.author_id)
            .unwrap_or(false);
        if owns_room && !skip_server_close {
            server_close = self.context.rooms.close(room.id).await;
            if let Err(error) = &server_close {
                warn!(%error, room_id = room.id, "server-side room close failed");
            }
        }

        if let Ok(mut slot) = self.state.write() {
            *slot = None;
        }
        self.context.clear_room_header();
        debug!(room_id = room.id, "channel session closed");

        server_close.map_err(LiveError::Api)
    }
}

/// Appends the facade token as a query parameter when the URL carries none.
fn with_token_param(url: &str, token: &str) -> String {
    if url.contains("token=") {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}token={token}")
}
