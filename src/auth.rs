//! Credentials, sign-in and token refresh.
//!
//! The auth host speaks its own wire shape (`{data: {jwt, refreshToken}}`)
//! rather than the platform envelope, so this module talks to the base HTTP
//! transport directly. Credential mutation and header re-propagation to the
//! dependent REST transports happen together in [`SessionRefresher`]: the
//! mutator is responsible for keeping the transports current.

use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use futures_util::future::{BoxFuture, FutureExt};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::api::TokenRefresher;
use crate::config::Country;
use crate::http::{HttpError, HttpTransport, RequestOptions};

/// Sign-in identity, mirroring the account types the platform accepts.
#[derive(Clone, Debug)]
pub enum SignInAccount {
    /// National phone number without the calling prefix.
    Phone(String),
    Email(String),
}

impl SignInAccount {
    fn act_type(&self) -> &'static str {
        match self {
            Self::Phone(_) => "phone",
            Self::Email(_) => "email",
        }
    }
}

/// Long-lived session credential owned by the facade.
///
/// Mutated only by sign-in and refresh; every mutation must re-propagate the
/// access token to the dependent transports.
#[derive(Clone)]
pub struct Credential {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub device_id: String,
    pub user_id: u64,
}

impl Credential {
    /// Builds a credential from a token pair, recovering the device id and
    /// user id from the access token claims.
    pub fn from_tokens(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let access_token = access_token.into();
        let claims = decode_claims(&access_token)?;
        let user_id = claims.user_id().ok_or(AuthError::MalformedToken)?;
        Ok(Self {
            access_token: SecretString::new(access_token),
            refresh_token: SecretString::new(refresh_token.into()),
            device_id: claims.did,
            user_id,
        })
    }

    /// Replaces the access token in place, keeping the refresh token.
    pub fn rotate_access_token(&mut self, access_token: impl Into<String>) -> Result<(), AuthError> {
        let access_token = access_token.into();
        let claims = decode_claims(&access_token)?;
        if let Some(user_id) = claims.user_id() {
            self.user_id = user_id;
        }
        if !claims.did.is_empty() {
            self.device_id = claims.did;
        }
        self.access_token = SecretString::new(access_token);
        Ok(())
    }

    /// `Bearer`-prefixed header value for REST transports.
    pub fn authorization_value(&self) -> Result<HeaderValue, AuthError> {
        let value = format!("Bearer {}", self.access_token.expose_secret());
        HeaderValue::from_str(&value).map_err(|_| AuthError::MalformedToken)
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    did: String,
    #[serde(default)]
    sub: Value,
}

impl TokenClaims {
    fn user_id(&self) -> Option<u64> {
        self.sub
            .as_u64()
            .or_else(|| self.sub.as_str().and_then(|sub| sub.parse().ok()))
    }
}

fn decode_claims(jwt: &str) -> Result<TokenClaims, AuthError> {
    let payload = jwt.split('.').nth(1).ok_or(AuthError::MalformedToken)?;
    let raw = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| AuthError::MalformedToken)?;
    serde_json::from_slice(&raw).map_err(|_| AuthError::MalformedToken)
}

/// Errors produced during sign-in and refresh.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The token response carried no usable token pair.
    #[error("auth response carried no token: {detail}")]
    Rejected { detail: String },

    /// The access token was not a decodable JWT.
    #[error("access token is not a decodable token")]
    MalformedToken,
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    #[serde(default)]
    data: Option<TokenData>,
    #[serde(default)]
    detail: String,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    #[serde(default)]
    jwt: String,
    #[serde(default, rename = "refreshToken")]
    refresh_token: String,
}

/// Client for the auth token host.
#[derive(Clone)]
pub struct AuthClient {
    http: HttpTransport,
    country: Country,
}

impl AuthClient {
    pub fn new(http: HttpTransport, country: Country) -> Self {
        Self { http, country }
    }

    /// Exchanges account credentials for a token pair.
    pub async fn sign_in(
        &self,
        account: &SignInAccount,
        password: &str,
        device_id: &str,
    ) -> Result<Credential, AuthError> {
        let mut auth_data = json!({
            "act_type": account.act_type(),
            "password": password,
        });
        match account {
            SignInAccount::Phone(number) => {
                let msisdn: u64 = format!("{}{}", self.country.calling_prefix(), number)
                    .parse()
                    .map_err(|_| AuthError::Rejected {
                        detail: "phone account must be numeric".to_string(),
                    })?;
                auth_data["msisdn"] = json!(msisdn);
            }
            SignInAccount::Email(email) => {
                auth_data["email"] = json!(email);
            }
        }

        let response = self
            .http
            .request(
                "/tokens/",
                RequestOptions::post().json(json!({
                    "auth_data": auth_data,
                    "device_unique_id": device_id,
                })),
            )
            .await?;

        let envelope: TokenEnvelope =
            serde_json::from_value(response.body).unwrap_or_else(|_| TokenEnvelope {
                data: None,
                detail: "unrecognized token response".to_string(),
            });
        let data = envelope.data.filter(|data| !data.jwt.is_empty());
        let Some(data) = data else {
            return Err(AuthError::Rejected {
                detail: envelope.detail,
            });
        };
        debug!("sign-in issued a token pair");
        Credential::from_tokens(data.jwt, data.refresh_token)
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// Returns `Ok(None)` when the host answers without a token, which the
    /// caller treats as a failed refresh rather than an error.
    pub async fn refresh(
        &self,
        user_id: u64,
        refresh_token: &SecretString,
        device_id: &str,
    ) -> Result<Option<String>, AuthError> {
        let response = self
            .http
            .request(
                "/tokens/",
                RequestOptions::put().json(json!({
                    "user_id": user_id,
                    "refresh_token": refresh_token.expose_secret(),
                    "device_unique_id": device_id,
                })),
            )
            .await?;

        let envelope: TokenEnvelope = match serde_json::from_value(response.body) {
            Ok(envelope) => envelope,
            Err(_) => return Ok(None),
        };
        Ok(envelope
            .data
            .map(|data| data.jwt)
            .filter(|jwt| !jwt.is_empty()))
    }
}

/// Shared credential store plus the transports whose Authorization header
/// tracks it.
pub struct SessionRefresher {
    auth: AuthClient,
    credential: Arc<RwLock<Option<Credential>>>,
    transports: Vec<HttpTransport>,
}

impl SessionRefresher {
    pub fn new(
        auth: AuthClient,
        credential: Arc<RwLock<Option<Credential>>>,
        transports: Vec<HttpTransport>,
    ) -> Self {
        Self {
            auth,
            credential,
            transports,
        }
    }

    /// Stores `credential` and pushes its Authorization header onto every
    /// dependent transport.
    pub fn install(&self, credential: Credential) -> Result<(), AuthError> {
        let header = credential.authorization_value()?;
        for transport in &self.transports {
            transport.set_default_header(AUTHORIZATION, header.clone());
        }
        if let Ok(mut slot) = self.credential.write() {
            *slot = Some(credential);
        }
        Ok(())
    }

    async fn run_refresh(
        auth: AuthClient,
        credential: Arc<RwLock<Option<Credential>>>,
        transports: Vec<HttpTransport>,
    ) -> bool {
        let snapshot = credential.read().ok().and_then(|slot| slot.clone());
        let Some(current) = snapshot else {
            warn!("no credential to refresh");
            return false;
        };

        let refreshed = auth
            .refresh(current.user_id, &current.refresh_token, &current.device_id)
            .await;
        let jwt = match refreshed {
            Ok(Some(jwt)) => jwt,
            Ok(None) => {
                error!("token refresh rejected by auth host");
                return false;
            }
            Err(error) => {
                error!(%error, "token refresh failed");
                return false;
            }
        };

        let mut rotated = current;
        if rotated.rotate_access_token(jwt).is_err() {
            error!("refreshed token is not decodable");
            return false;
        }
        let Ok(header) = rotated.authorization_value() else {
            return false;
        };
        for transport in &transports {
            transport.set_default_header(AUTHORIZATION, header.clone());
        }
        if let Ok(mut slot) = credential.write() {
            *slot = Some(rotated);
        }
        debug!("credential refreshed and re-propagated");
        true
    }
}

impl TokenRefresher for SessionRefresher {
    fn refresh(&self) -> BoxFuture<'static, bool> {
        let auth = self.auth.clone();
        let credential = Arc::clone(&self.credential);
        let transports = self.transports.clone();
        Self::run_refresh(auth, credential, transports).boxed()
    }
}
