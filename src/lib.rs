//! Rust SDK for the Aircast live-audio platform.
//!
//! The crate is organized by transport surface:
//! - `config`: hosts, country and client identity settings.
//! - `http`: base HTTP transport shared by every REST surface.
//! - `api`: authenticated REST transport with expired-token recovery.
//! - `auth`: credential bootstrap, sign-in and token refresh.
//! - `live`: realtime room clients for the legacy and gateway protocols.
//! - `client`: top-level facade owning credentials and transports.

/// Authenticated REST transport and response envelopes.
pub mod api;
/// Credentials, sign-in and token refresh.
pub mod auth;
/// Top-level client facade.
pub mod client;
/// Host and client identity configuration.
pub mod config;
/// Base HTTP transport.
pub mod http;
/// Realtime room protocol clients, codecs and sessions.
pub mod live;
