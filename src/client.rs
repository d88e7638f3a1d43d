//! Top-level facade owning credentials, transports and the shared gateway
//! socket.
//!
//! The facade holds exactly one credential and one shared gateway socket.
//! Components receive the pieces they need at construction; credential
//! changes are propagated to the REST transports by whichever path mutates
//! them (sign-in, manual install, or the refresh gate).

use std::sync::{Arc, RwLock};

use secrecy::ExposeSecret;
use tracing::info;

use crate::api::{ApiTransport, RefreshGate};
use crate::auth::{AuthClient, AuthError, Credential, SessionRefresher, SignInAccount};
use crate::config::ClientConfig;
use crate::http::{HttpError, HttpTransport};
use crate::live::api::RoomApi;
use crate::live::room::{ChannelSession, LiveError, LiveSession, RoomContext};
use crate::live::socket::{Protocol, SocketSession};

/// Aircast platform client.
pub struct Aircast {
    config: ClientConfig,
    api: ApiTransport,
    gateway: ApiTransport,
    auth: AuthClient,
    credential: Arc<RwLock<Option<Credential>>>,
    refresher: Arc<SessionRefresher>,
    gate: Arc<RefreshGate>,
    gateway_socket: SocketSession,
}

impl Aircast {
    /// Builds the client and its transports. No network traffic happens
    /// until the first call.
    pub fn new(config: ClientConfig) -> Result<Self, HttpError> {
        let api_http = HttpTransport::new(&config.api_base, &config, &config.http)?;
        let gateway_http = HttpTransport::new(&config.gateway_base, &config, &config.http)?;
        let auth_http = HttpTransport::new(&config.auth_base, &config, &config.http)?;

        let credential = Arc::new(RwLock::new(None));
        let auth = AuthClient::new(auth_http, config.country);
        let refresher = Arc::new(SessionRefresher::new(
            auth.clone(),
            Arc::clone(&credential),
            vec![api_http.clone(), gateway_http.clone()],
        ));
        let gate = Arc::new(RefreshGate::new(
            Arc::clone(&refresher) as Arc<dyn crate::api::TokenRefresher>
        ));

        let api = ApiTransport::new(api_http, Arc::clone(&gate));
        let gateway = ApiTransport::new(gateway_http, Arc::clone(&gate));
        let gateway_socket = SocketSession::new(Protocol::V2, &config);

        Ok(Self {
            config,
            api,
            gateway,
            auth,
            credential,
            refresher,
            gate,
            gateway_socket,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Authenticated REST transport for the API host.
    pub fn api(&self) -> &ApiTransport {
        &self.api
    }

    /// Authenticated REST transport for the gateway host.
    pub fn gateway(&self) -> &ApiTransport {
        &self.gateway
    }

    /// Room REST operations.
    pub fn rooms(&self) -> RoomApi {
        RoomApi::new(self.api.clone())
    }

    /// Signs in and installs the issued credential on both transports.
    pub async fn sign_in(
        &self,
        account: SignInAccount,
        password: &str,
    ) -> Result<(), AuthError> {
        // Before the first token is issued the device identifies itself with
        // a user-agent-derived id, as the platform apps do.
        let device_id = self
            .credential()
            .map(|credential| credential.device_id)
            .unwrap_or_else(|| self.config.user_agent.to_lowercase());
        let credential = self.auth.sign_in(&account, password, &device_id).await?;
        let user_id = credential.user_id;
        self.refresher.install(credential)?;
        info!(user_id, "signed in");
        Ok(())
    }

    /// Installs an existing token pair (restored session).
    pub fn set_credential(
        &self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<(), AuthError> {
        let credential = Credential::from_tokens(access_token, refresh_token)?;
        self.refresher.install(credential)
    }

    /// Manually triggers the shared refresh path; concurrent callers
    /// coalesce into one refresh.
    pub async fn refresh_token(&self) -> bool {
        self.gate.refresh().await
    }

    /// Snapshot of the current credential.
    pub fn credential(&self) -> Option<Credential> {
        self.credential.read().ok().and_then(|slot| slot.clone())
    }

    pub fn user_id(&self) -> Option<u64> {
        self.credential().map(|credential| credential.user_id)
    }

    /// The shared gateway socket session.
    pub fn gateway_socket(&self) -> &SocketSession {
        &self.gateway_socket
    }

    /// Connects the shared gateway socket with the current access token.
    pub async fn connect_gateway(&self) -> Result<(), LiveError> {
        let credential = self.credential().ok_or(LiveError::NotSignedIn)?;
        let url = format!(
            "{}?token={}",
            self.config.gateway_socket,
            credential.access_token.expose_secret()
        );
        self.gateway_socket.connect(&url).await?;
        Ok(())
    }

    /// Disconnects the shared gateway socket.
    pub fn disconnect_gateway(&self) {
        self.gateway_socket.disconnect();
    }

    /// Creates a legacy-protocol room session with a dedicated socket.
    pub fn live_session(&self) -> LiveSession {
        let socket = SocketSession::new(Protocol::Legacy, &self.config);
        LiveSession::new(self.room_context(), socket)
    }

    /// Creates a gateway-protocol room session borrowing the shared socket.
    pub fn channel_session(&self) -> ChannelSession {
        ChannelSession::new(
            self.room_context(),
            self.gateway_socket.clone(),
            self.config.gateway_socket.clone(),
        )
    }

    fn room_context(&self) -> RoomContext {
        RoomContext {
            rooms: self.rooms(),
            api: self.api.clone(),
            gateway: self.gateway.clone(),
            credential: Arc::clone(&self.credential),
            app_version: self.config.app_version.clone(),
            user_agent: self.config.user_agent.clone(),
        }
    }
}
