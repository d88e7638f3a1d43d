//! Realtime room modules.
//!
//! - `event`: the flat event taxonomy shared by both wire protocols.
//! - `legacy`: codec for the legacy room/game socket protocol.
//! - `v2`: codec for the command-wrapped gateway protocol.
//! - `socket`: socket session, listener bus and request correlation.
//! - `room`: room sessions binding a socket to one active room.
//! - `api`: room REST operations used by the sessions.

/// Room REST operations.
pub mod api;
/// Event taxonomy, envelopes and room state.
pub mod event;
/// Legacy protocol codec.
pub mod legacy;
/// Room sessions for both protocols.
pub mod room;
/// Socket session and event bus.
pub mod socket;
/// Gateway v2 protocol codec.
pub mod v2;
