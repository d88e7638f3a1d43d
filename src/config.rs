//! Client configuration: service hosts, country routing, and the identity
//! strings every request carries.
//!
//! Hosts are derived from the country code by default and can be overridden
//! individually, which is how tests point the SDK at local mock servers.

use std::time::Duration;

/// Service country, used to route API, gateway and auth hosts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Country {
    Korea,
    Japan,
    UnitedStates,
}

impl Country {
    /// Lowercase country code used in host names.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Korea => "kr",
            Self::Japan => "jp",
            Self::UnitedStates => "us",
        }
    }

    /// International calling prefix, prepended to phone sign-in accounts.
    pub fn calling_prefix(&self) -> &'static str {
        match self {
            Self::Korea => "82",
            Self::Japan => "81",
            Self::UnitedStates => "1",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HttpDefaults;

impl HttpDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
}

/// Timeouts applied by the HTTP transports.
#[derive(Clone, Debug)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: HttpDefaults::CONNECT_TIMEOUT,
            request_timeout: HttpDefaults::REQUEST_TIMEOUT,
        }
    }
}

/// Static client configuration owned by the facade.
///
/// The bearer token is not part of the configuration; it is supplied by the
/// facade after sign-in and propagated to the transports explicitly.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub country: Country,
    /// REST API host.
    pub api_base: String,
    /// Gateway REST host.
    pub gateway_base: String,
    /// Auth token host.
    pub auth_base: String,
    /// Shared gateway websocket endpoint (v2 protocol).
    pub gateway_socket: String,
    /// Application version reported on socket frames.
    pub app_version: String,
    /// User agent sent on every HTTP request and socket handshake.
    pub user_agent: String,
    /// Referer/origin site for browser-parity headers.
    pub site_origin: String,
    pub http: HttpOptions,
}

impl ClientConfig {
    /// Production hosts for the given country.
    pub fn new(country: Country) -> Self {
        let code = country.code();
        Self {
            country,
            api_base: format!("https://{code}-api.aircast.live"),
            gateway_base: format!("https://{code}-gw.aircast.live"),
            auth_base: format!("https://{code}-auth.aircast.live"),
            gateway_socket: format!("wss://{code}-gate.aircast.live/ws"),
            app_version: "10.10.2".to_string(),
            user_agent: concat!(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 ",
                "(KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36"
            )
            .to_string(),
            site_origin: "https://www.aircast.live".to_string(),
            http: HttpOptions::default(),
        }
    }

    /// Overrides the REST API host.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = trim_base(base.into());
        self
    }

    /// Overrides the gateway REST host.
    pub fn with_gateway_base(mut self, base: impl Into<String>) -> Self {
        self.gateway_base = trim_base(base.into());
        self
    }

    /// Overrides the auth token host.
    pub fn with_auth_base(mut self, base: impl Into<String>) -> Self {
        self.auth_base = trim_base(base.into());
        self
    }

    /// Overrides the shared gateway websocket endpoint.
    pub fn with_gateway_socket(mut self, url: impl Into<String>) -> Self {
        self.gateway_socket = trim_base(url.into());
        self
    }

    /// Overrides the reported application version.
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn with_http_options(mut self, http: HttpOptions) -> Self {
        self.http = http;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Country::Korea)
    }
}

fn trim_base(mut base: String) -> String {
    while base.ends_with('/') {
        base.pop();
    }
    base
}
