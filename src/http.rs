//! Base HTTP transport shared by the API, gateway and auth surfaces.
//!
//! Each transport owns a base URL and a mutable default-header map. Default
//! headers are re-read on every request, so a header attached at runtime
//! (bearer token, room token) applies to all subsequent calls until removed.

use std::sync::{Arc, RwLock};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ClientConfig, HttpOptions};

const BODY_SNIPPET_LEN: usize = 200;

/// Errors produced by the base HTTP transport.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Client construction or request transport failure.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A header value could not be encoded.
    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),

    /// The response body was not valid JSON.
    #[error("failed to decode response body: {source}. body={body}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

/// Options for a single request.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: None,
            query: Vec::new(),
            headers: HeaderMap::new(),
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    /// Attaches a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Appends a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Attaches a per-request header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A parsed HTTP response: status line plus decoded JSON body.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Value,
}

struct Inner {
    http: Client,
    base_url: String,
    default_headers: RwLock<HeaderMap>,
}

/// HTTP transport bound to one base URL.
///
/// Cheap to clone; clones share the underlying client and default headers.
#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<Inner>,
}

impl HttpTransport {
    /// Creates a transport for `base_url` with browser-parity identity
    /// headers from `config`.
    pub fn new(
        base_url: impl Into<String>,
        config: &ClientConfig,
        options: &HttpOptions,
    ) -> Result<Self, HttpError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_str(&config.user_agent)?,
        );
        default_headers.insert(
            reqwest::header::REFERER,
            HeaderValue::from_str(&format!("{}/", config.site_origin))?,
        );
        default_headers.insert(
            reqwest::header::ORIGIN,
            HeaderValue::from_str(&config.site_origin)?,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.into(),
                default_headers: RwLock::new(default_headers),
            }),
        })
    }

    /// Sets a default header applied to every subsequent request.
    pub fn set_default_header(&self, name: HeaderName, value: HeaderValue) {
        if let Ok(mut headers) = self.inner.default_headers.write() {
            headers.insert(name, value);
        }
    }

    /// Removes a default header.
    pub fn remove_default_header(&self, name: &HeaderName) {
        if let Ok(mut headers) = self.inner.default_headers.write() {
            headers.remove(name);
        }
    }

    /// Issues a request against `path` (or an absolute URL) and decodes the
    /// JSON body regardless of status.
    pub async fn request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, HttpError> {
        let url = self.resolve(path);
        let defaults = self
            .inner
            .default_headers
            .read()
            .map(|headers| headers.clone())
            .unwrap_or_default();

        let mut builder = self
            .inner
            .http
            .request(options.method.clone(), url.as_str())
            .headers(defaults)
            .headers(options.headers);
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = options.body.as_ref() {
            builder = builder.json(body);
        }

        debug!(method = %options.method, %url, "http request");
        let response = builder.send().await.inspect_err(|error| {
            warn!(%url, %error, "http request failed");
        })?;
        let status = response.status();
        let text = response.text().await?;
        let body: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|source| HttpError::Decode {
                source,
                body: snippet(&text),
            })?
        };

        debug!(%status, %url, body = %snippet(&text), "http response");
        Ok(HttpResponse { status, body })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.inner.base_url, path)
        }
    }
}

fn snippet(text: &str) -> String {
    if text.len() <= BODY_SNIPPET_LEN {
        return text.to_string();
    }
    let mut end = BODY_SNIPPET_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
