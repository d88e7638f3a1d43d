//! Socket session: one websocket connection multiplexed into typed events.
//!
//! A background worker owns the websocket and processes inbound frames
//! strictly in arrival order: each frame is decoded exactly once, then
//! dispatched to the pre-hooks, the kind-specific listeners, the correlation
//! waiter, the wildcard listeners, and the post-hooks, in that order.
//! Dispatch for one frame never yields, so listener-maintained state is race
//! free.
//!
//! The session never reconnects on its own: once the connection drops, the
//! state is `Disconnected` until the owner calls [`SocketSession::connect`]
//! again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::live::event::{Decoded, EventEnvelope, EventKind};
use crate::live::{legacy, v2};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Wire protocol spoken on the connection; selects the codec.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    Legacy,
    V2,
}

/// Externally visible connection state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Errors produced by the socket session.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("invalid handshake header: {0}")]
    Header(#[from] InvalidHeaderValue),

    /// `connect` was called while a connection is active.
    #[error("socket session is already active")]
    AlreadyActive,

    #[error("socket is not connected")]
    NotConnected,

    /// A correlation waiter for this kind is already outstanding.
    #[error("a waiter for {0:?} is already registered")]
    WaiterBusy(EventKind),

    #[error("timed out waiting for {0:?}")]
    ResponseTimeout(EventKind),

    #[error("connection closed while waiting for {0:?}")]
    ConnectionClosed(EventKind),
}

/// Pre-hook with mutable access, run before any listener.
pub type BeforeHook = Box<dyn FnMut(&mut EventEnvelope) + Send>;
/// Plain listener.
pub type Listener = Box<dyn FnMut(&EventEnvelope) + Send>;

#[derive(Default)]
struct Listeners {
    before: Vec<BeforeHook>,
    specific: HashMap<EventKind, Vec<Listener>>,
    wildcard: Vec<Listener>,
    after: Vec<Listener>,
}

enum ConnState {
    Disconnected,
    Connecting,
    Connected {
        outbound: mpsc::UnboundedSender<String>,
    },
}

struct Shared {
    protocol: Protocol,
    user_agent: String,
    origin: String,
    state: Mutex<ConnState>,
    listeners: Mutex<Listeners>,
    waiters: Mutex<HashMap<EventKind, oneshot::Sender<EventEnvelope>>>,
}

/// One socket session; cheap to clone, clones share the connection.
#[derive(Clone)]
pub struct SocketSession {
    inner: Arc<Shared>,
}

impl SocketSession {
    pub fn new(protocol: Protocol, config: &ClientConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                protocol,
                user_agent: config.user_agent.clone(),
                origin: config.site_origin.clone(),
                state: Mutex::new(ConnState::Disconnected),
                listeners: Mutex::new(Listeners::default()),
                waiters: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.inner.protocol
    }

    pub fn state(&self) -> ConnectionState {
        match *self.inner.state.lock().unwrap_or_else(|err| err.into_inner()) {
            ConnState::Disconnected => ConnectionState::Disconnected,
            ConnState::Connecting => ConnectionState::Connecting,
            ConnState::Connected { .. } => ConnectionState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Opens the connection, suspending until the handshake completes.
    ///
    /// Fails if the connection errors before opening; the session is back in
    /// `Disconnected` and may be retried by the owner.
    pub async fn connect(&self, url: &str) -> Result<(), SocketError> {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            if !matches!(*state, ConnState::Disconnected) {
                return Err(SocketError::AlreadyActive);
            }
            *state = ConnState::Connecting;
        }

        let handshake = async {
            let mut request = url.into_client_request()?;
            request
                .headers_mut()
                .insert("User-Agent", HeaderValue::from_str(&self.inner.user_agent)?);
            request
                .headers_mut()
                .insert("Origin", HeaderValue::from_str(&self.inner.origin)?);
            let (socket, _) = connect_async(request).await?;
            Ok::<Socket, SocketError>(socket)
        };

        let socket = match handshake.await {
            Ok(socket) => socket,
            Err(error) => {
                self.mark_disconnected();
                return Err(error);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            *state = ConnState::Connected {
                outbound: outbound_tx,
            };
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_worker(inner, socket, outbound_rx));

        info!(url, protocol = ?self.inner.protocol, "socket connected");
        Ok(())
    }

    /// Fire-and-forget send.
    ///
    /// Dropped with a warning when the session is not connected; outbound
    /// frames are never queued across connections.
    pub fn send(&self, mut frame: Value) {
        if self.inner.protocol == Protocol::Legacy {
            legacy::ensure_bearer_token(&mut frame);
        }
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        match &*state {
            ConnState::Connected { outbound } => {
                debug!(frame = %frame, "socket send");
                if outbound.send(frame.to_string()).is_err() {
                    warn!("socket worker stopped; outbound frame dropped");
                }
            }
            _ => warn!("socket not connected; outbound frame dropped"),
        }
    }

    /// Sends a frame and suspends until one event of `kind` arrives.
    ///
    /// At most one waiter per kind may be outstanding; a second simultaneous
    /// wait is an error. A timeout cancels only the wait, never the send,
    /// and leaves the connection open.
    pub async fn send_and_wait(
        &self,
        frame: Value,
        kind: EventKind,
        timeout: Option<Duration>,
    ) -> Result<EventEnvelope, SocketError> {
        if !self.is_connected() {
            return Err(SocketError::NotConnected);
        }

        let receiver = {
            let mut waiters = self
                .inner
                .waiters
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            if waiters.contains_key(&kind) {
                return Err(SocketError::WaiterBusy(kind));
            }
            let (sender, receiver) = oneshot::channel();
            waiters.insert(kind, sender);
            receiver
        };

        self.send(frame);

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(received) => received,
                Err(_) => {
                    self.remove_waiter(kind);
                    return Err(SocketError::ResponseTimeout(kind));
                }
            },
            None => receiver.await,
        };
        outcome.map_err(|_| SocketError::ConnectionClosed(kind))
    }

    /// Closes the connection and releases listeners and waiters. Idempotent;
    /// a no-op when connect never completed.
    pub fn disconnect(&self) {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            // Dropping the outbound sender stops the worker, which closes
            // the websocket.
            *state = ConnState::Disconnected;
        }
        self.clear_listeners();
        self.inner
            .waiters
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clear();
    }

    /// Registers a listener for one event kind.
    pub fn on(&self, kind: EventKind, listener: impl FnMut(&EventEnvelope) + Send + 'static) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .specific
            .entry(kind)
            .or_default()
            .push(Box::new(listener));
    }

    /// Registers a wildcard listener receiving every decoded event.
    pub fn on_any(&self, listener: impl FnMut(&EventEnvelope) + Send + 'static) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .wildcard
            .push(Box::new(listener));
    }

    /// Registers a pre-hook with mutable access to the envelope.
    pub fn on_before(&self, hook: impl FnMut(&mut EventEnvelope) + Send + 'static) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .before
            .push(Box::new(hook));
    }

    /// Registers a post-hook run after all listeners.
    pub fn on_after(&self, listener: impl FnMut(&EventEnvelope) + Send + 'static) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .after
            .push(Box::new(listener));
    }

    pub fn clear_listeners(&self) {
        *self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|err| err.into_inner()) = Listeners::default();
    }

    fn remove_waiter(&self, kind: EventKind) {
        self.inner
            .waiters
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .remove(&kind);
    }

    fn mark_disconnected(&self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        *state = ConnState::Disconnected;
    }

    #[cfg(test)]
    pub(crate) fn inject_frame(&self, text: &str) {
        self.inner.process_frame(text);
    }
}

impl Shared {
    /// Decodes one inbound frame and runs the full dispatch order.
    fn process_frame(&self, text: &str) {
        let decoded = match self.protocol {
            Protocol::Legacy => legacy::decode(text),
            Protocol::V2 => v2::decode(text),
        };
        let mut envelope = match decoded {
            Decoded::Event(envelope) => envelope,
            Decoded::Skip => {
                debug!("inbound frame carries no event");
                return;
            }
            Decoded::Malformed(reason) => {
                warn!(%reason, "dropping malformed inbound frame");
                return;
            }
        };

        let mut listeners = self.listeners.lock().unwrap_or_else(|err| err.into_inner());

        for hook in &mut listeners.before {
            hook(&mut envelope);
        }

        if envelope.kind != EventKind::Unrecognized {
            if let Some(specific) = listeners.specific.get_mut(&envelope.kind) {
                for listener in specific {
                    listener(&envelope);
                }
            }
            let waiter = self
                .waiters
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .remove(&envelope.kind);
            if let Some(waiter) = waiter {
                let _ = waiter.send(envelope.clone());
            }
        }

        for listener in &mut listeners.wildcard {
            listener(&envelope);
        }
        for listener in &mut listeners.after {
            listener(&envelope);
        }
    }

    fn worker_finished(&self) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        if matches!(*state, ConnState::Connected { .. }) {
            warn!("socket connection closed; owner must reconnect");
            *state = ConnState::Disconnected;
        }
        // Wake pending correlation waits with a closed-channel error.
        self.waiters
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clear();
    }
}

/// Owns the websocket until it closes or the session disconnects.
async fn run_worker(
    inner: Arc<Shared>,
    socket: Socket,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
            maybe_inbound = stream.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => inner.process_frame(&text),
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(%error, "socket receive error");
                        break;
                    }
                }
            }
        }
    }

    inner.worker_finished();
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::{ConnectionState, Protocol, SocketSession};
    use crate::config::ClientConfig;
    use crate::live::event::EventKind;

    fn session(protocol: Protocol) -> SocketSession {
        SocketSession::new(protocol, &ClientConfig::default())
    }

    fn record(order: &Arc<Mutex<Vec<&'static str>>>, step: &'static str) {
        order.lock().expect("order lock").push(step);
    }

    #[test]
    fn dispatch_order_is_before_specific_wildcard_after() {
        let session = session(Protocol::Legacy);
        let order = Arc::new(Mutex::new(Vec::new()));

        let hook_order = Arc::clone(&order);
        session.on_before(move |_| record(&hook_order, "before"));
        let specific_order = Arc::clone(&order);
        session.on(EventKind::Message, move |_| {
            record(&specific_order, "specific");
        });
        let wildcard_order = Arc::clone(&order);
        session.on_any(move |_| record(&wildcard_order, "wildcard"));
        let after_order = Arc::clone(&order);
        session.on_after(move |_| record(&after_order, "after"));

        session.inject_frame(
            &json!({
                "event": "live_message",
                "data": {"user": {"id": 1, "nickname": "a"}},
                "update_component": {"message": {"value": "hi"}}
            })
            .to_string(),
        );

        assert_eq!(
            *order.lock().expect("order lock"),
            vec!["before", "specific", "wildcard", "after"]
        );
    }

    #[test]
    fn unrecognized_frames_reach_hooks_and_wildcard_only() {
        let session = session(Protocol::Legacy);
        let order = Arc::new(Mutex::new(Vec::new()));

        let hook_order = Arc::clone(&order);
        session.on_before(move |_| record(&hook_order, "before"));
        let specific_order = Arc::clone(&order);
        session.on(EventKind::Message, move |_| {
            record(&specific_order, "specific");
        });
        let wildcard_order = Arc::clone(&order);
        session.on_any(move |_| record(&wildcard_order, "wildcard"));
        let after_order = Arc::clone(&order);
        session.on_after(move |_| record(&after_order, "after"));

        session.inject_frame(&json!({"event": "live_mystery"}).to_string());

        assert_eq!(
            *order.lock().expect("order lock"),
            vec!["before", "wildcard", "after"]
        );
    }

    #[test]
    fn pre_hook_mutations_are_visible_to_listeners() {
        let session = session(Protocol::Legacy);
        session.on_before(|envelope| {
            if let Some(user) = envelope.payload.user_mut() {
                user.is_moderator = true;
            }
        });
        let seen = Arc::new(Mutex::new(false));
        let seen_in_listener = Arc::clone(&seen);
        session.on(EventKind::Message, move |envelope| {
            let stamped = envelope.payload.user().is_some_and(|user| user.is_moderator);
            *seen_in_listener.lock().expect("seen lock") = stamped;
        });

        session.inject_frame(
            &json!({
                "event": "live_message",
                "data": {"user": {"id": 5, "nickname": "m"}},
                "update_component": {"message": {"value": "x"}}
            })
            .to_string(),
        );
        assert!(*seen.lock().expect("seen lock"));
    }

    #[test]
    fn send_before_connect_is_dropped_without_panic() {
        let session = session(Protocol::Legacy);
        session.send(json!({"event": "live_message", "message": "dropped"}));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_is_idempotent_even_without_a_connection() {
        let session = session(Protocol::V2);
        session.disconnect();
        session.disconnect();
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_and_wait_requires_a_connection() {
        let session = session(Protocol::Legacy);
        let error = session
            .send_and_wait(json!({}), EventKind::State, None)
            .await
            .expect_err("not connected");
        assert!(matches!(error, super::SocketError::NotConnected));
    }
}
