//! Authenticated REST transport.
//!
//! Every platform REST response is wrapped in one envelope shape. This layer
//! decodes the envelope, turns non-success statuses into typed error values,
//! and recovers from the expired-token status by coordinating a single
//! credential refresh shared by every in-flight request: the first caller to
//! observe the status starts the refresh, later callers attach to the same
//! outcome, and each caller replays its own request exactly once on success.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::http::{HttpError, HttpResponse, HttpTransport, RequestOptions};

/// Domain status signalling an expired access token.
pub const EXPIRED_TOKEN_STATUS: u16 = 460;

/// Success envelope carried by every platform REST response.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub status_code: u16,
    #[serde(default)]
    pub detail: String,
    /// Absolute URL of the next page, empty when exhausted.
    #[serde(default)]
    pub next: String,
    /// Absolute URL of the previous page, empty on the first page.
    #[serde(default)]
    pub previous: String,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

impl<T> ApiResponse<T> {
    pub fn has_next(&self) -> bool {
        !self.next.is_empty()
    }

    pub fn has_previous(&self) -> bool {
        !self.previous.is_empty()
    }

    /// Consumes the envelope and returns the first result, if any.
    pub fn into_first(self) -> Option<T> {
        self.results.into_iter().next()
    }
}

/// Error detail carried inside a non-success envelope.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status_code: u16,
}

/// Errors produced by the authenticated transport.
///
/// Non-success statuses are values of this type, never panics; callers
/// discriminate on the variant.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport or body-decode failure below the envelope layer.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The platform returned a non-success envelope.
    #[error("api status {status_code}: {detail}")]
    Status {
        status_code: u16,
        detail: String,
        error: Option<ApiErrorBody>,
    },

    /// The success envelope did not match the expected result shape.
    #[error("unexpected response shape: {0}")]
    Envelope(#[source] serde_json::Error),
}

impl ApiError {
    /// True when this error is the expired-token status surfaced after a
    /// failed or exhausted refresh.
    pub fn is_expired_token(&self) -> bool {
        matches!(
            self,
            Self::Status { status_code, .. } if *status_code == EXPIRED_TOKEN_STATUS
        )
    }
}

/// Performs one credential refresh, returning whether new credentials are in
/// place. Implementations must propagate the new token to the dependent
/// transports before resolving.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self) -> BoxFuture<'static, bool>;
}

type SharedRefresh = Shared<BoxFuture<'static, bool>>;

/// Single-flight coordinator for credential refreshes.
///
/// At most one refresh runs at a time; callers arriving while one is in
/// flight await the same outcome. The slot clears once the refresh settles,
/// so a later batch of expired responses can trigger a fresh attempt.
pub struct RefreshGate {
    refresher: Arc<dyn TokenRefresher>,
    inflight: Mutex<Option<SharedRefresh>>,
}

impl RefreshGate {
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            refresher,
            inflight: Mutex::new(None),
        }
    }

    /// Awaits the in-flight refresh, starting one if none is running.
    pub async fn refresh(&self) -> bool {
        let shared = {
            let mut slot = self.inflight.lock().await;
            match slot.as_ref() {
                Some(inflight) => {
                    debug!("attaching to in-flight credential refresh");
                    inflight.clone()
                }
                None => {
                    debug!("starting credential refresh");
                    let refresher = Arc::clone(&self.refresher);
                    let shared = async move { refresher.refresh().await }.boxed().shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };

        let refreshed = shared.await;

        let mut slot = self.inflight.lock().await;
        // Only clear a settled refresh; a newer in-flight one stays put.
        if slot.as_ref().is_some_and(|inflight| inflight.peek().is_some()) {
            *slot = None;
        }
        refreshed
    }
}

/// REST transport that decodes the platform envelope and recovers from
/// expired tokens.
#[derive(Clone)]
pub struct ApiTransport {
    http: HttpTransport,
    gate: Arc<RefreshGate>,
}

impl ApiTransport {
    pub fn new(http: HttpTransport, gate: Arc<RefreshGate>) -> Self {
        Self { http, gate }
    }

    /// Underlying transport, for default-header mutation.
    pub fn http(&self) -> &HttpTransport {
        &self.http
    }

    /// Issues a request and decodes the envelope.
    ///
    /// On the expired-token status the call suspends until the shared
    /// refresh settles: success replays the original request once and
    /// returns its result (a second expired status is surfaced as-is);
    /// failure returns the original error to every suspended caller.
    pub async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>, ApiError> {
        let response = self.http.request(path, options.clone()).await?;
        if envelope_status(&response) == EXPIRED_TOKEN_STATUS {
            if self.gate.refresh().await {
                let replayed = self.http.request(path, options).await?;
                return finish(replayed);
            }
            warn!(path, "credential refresh failed; surfacing expired-token status");
            return Err(status_error(&response));
        }
        finish(response)
    }

    /// Replays a list call against an absolute pagination URL with the same
    /// result shape.
    pub async fn follow<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.request(url, RequestOptions::get()).await
    }
}

fn finish<T: DeserializeOwned>(response: HttpResponse) -> Result<ApiResponse<T>, ApiError> {
    if envelope_status(&response) != 200 {
        return Err(status_error(&response));
    }
    serde_json::from_value(response.body).map_err(ApiError::Envelope)
}

/// Domain status from the envelope body, falling back to the HTTP status
/// when the body carries none.
fn envelope_status(response: &HttpResponse) -> u16 {
    response
        .body
        .get("status_code")
        .and_then(Value::as_u64)
        .map_or_else(|| response.status.as_u16(), |code| code as u16)
}

fn status_error(response: &HttpResponse) -> ApiError {
    let detail = response
        .body
        .get("detail")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let error = response
        .body
        .get("error")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok());
    ApiError::Status {
        status_code: envelope_status(response),
        detail,
        error,
    }
}
