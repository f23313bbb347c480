//! Connection Controller
//!
//! Owns the single physical socket to the exchange's market streams.
//!
//! # Session Lifecycle
//!
//! ```text
//! connect(keys) ─► Connecting ─► Connected ──► (server close / error)
//!                      │                              │
//!                      └─ handshake error ─► Error ───┤
//!                                                     ▼
//!                                               Disconnected ─► wait base·2^(n-1) ─► Connecting
//!                                                     │
//!                                          budget spent: stay Disconnected
//! ```
//!
//! Each `connect` starts a session task with its own cancellation token and
//! a fresh retry budget. A newer `connect` or a `disconnect` cancels the
//! token; a cancelled session announces nothing and dispatches nothing, so
//! observers never see a stale transition after the newer one.
//!
//! State transitions are serialized by one lock and every observer is
//! called, in registration order, while it is held. Observers must not call
//! `connect`, `disconnect` or `close` on the controller.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Connector, Socket, TransportError};
use crate::domain::streaming::{ConnectionState, StreamKey, StreamKeyError, build_connection_url};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::exchange::codec::parse_inbound_frame;
use crate::infrastructure::exchange::heartbeat::{
    HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState,
};
use crate::infrastructure::exchange::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::metrics;

/// How long a client-initiated close frame may take to send.
const CLOSE_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Heartbeat event channel capacity.
const HEARTBEAT_CHANNEL_CAPACITY: usize = 4;

/// Controller configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Stream endpoint base, e.g. `wss://stream.testnet.binance.vision`.
    pub base_url: String,
    /// Backoff settings.
    pub reconnect: ReconnectConfig,
    /// Keepalive settings.
    pub heartbeat: HeartbeatConfig,
}

impl ConnectionConfig {
    /// Create a configuration with default backoff and keepalive.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Why a socket session ended.
#[derive(Debug)]
enum SessionEnd {
    /// The session was superseded or disconnected.
    Cancelled,
    /// The server closed the socket or the stream ended.
    Closed,
    /// The socket failed.
    Failed(TransportError),
}

#[derive(Default)]
struct SessionSlot {
    cancel: Option<CancellationToken>,
    streams: Vec<StreamKey>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<SubscriptionRegistry>,
    state: RwLock<ConnectionState>,
    transition: Mutex<()>,
    session: Mutex<SessionSlot>,
}

/// Single-socket connection controller.
///
/// Decoded events are routed through the shared [`SubscriptionRegistry`],
/// which also holds the connection observers.
pub struct ConnectionController {
    inner: Arc<Inner>,
}

impl ConnectionController {
    /// Create an idle controller.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                registry,
                state: RwLock::new(ConnectionState::Disconnected),
                transition: Mutex::new(()),
                session: Mutex::new(SessionSlot::default()),
            }),
        }
    }

    /// Open a session carrying exactly `keys`, replacing any current one.
    ///
    /// The socket is opened on a background task; this returns as soon as
    /// the session is scheduled. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StreamKeyError::EmptyStreamSet`] if `keys` is empty. The
    /// current session, if any, is left untouched in that case.
    pub fn connect(&self, keys: Vec<StreamKey>) -> Result<(), StreamKeyError> {
        let url = build_connection_url(&self.inner.config.base_url, &keys)?;
        let token = CancellationToken::new();

        let mut slot = self.inner.session.lock();
        if let Some(previous) = slot.cancel.replace(token.clone()) {
            previous.cancel();
        }
        let previous_task = slot.task.take();
        slot.streams = keys;

        tracing::debug!(url = %url, streams = slot.streams.len(), "Starting market stream session");

        let inner = Arc::clone(&self.inner);
        slot.task = Some(tokio::spawn(async move {
            if let Some(previous) = previous_task {
                let _ = previous.await;
            }
            inner.run_session(url, token).await;
        }));

        Ok(())
    }

    /// Tear everything down: cancel any pending reconnect, close the socket
    /// and clear every kline and trade handler.
    ///
    /// Observers stay registered and see a final `Disconnected` if the
    /// state was anything else.
    pub fn disconnect(&self) {
        self.stop(true);
    }

    /// Close the socket and cancel reconnects but keep every handler.
    pub fn close(&self) {
        self.stop(false);
    }

    fn stop(&self, clear_handlers: bool) {
        {
            let mut slot = self.inner.session.lock();
            if let Some(token) = slot.cancel.take() {
                token.cancel();
            }
            slot.streams.clear();
        }

        if clear_handlers {
            self.inner.registry.clear();
        }

        let _guard = self.inner.transition.lock();
        let previous = std::mem::replace(&mut *self.inner.state.write(), ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            tracing::info!(previous = %previous, "Market stream disconnected");
            metrics::set_connection_state(ConnectionState::Disconnected);
            self.inner.registry.notify(ConnectionState::Disconnected);
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Streams requested by the current session; empty when idle.
    #[must_use]
    pub fn streams(&self) -> Vec<StreamKey> {
        self.inner.session.lock().streams.clone()
    }

    /// Whether a session is connected, connecting or waiting to retry.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let slot = self.inner.session.lock();
        slot.cancel.is_some() && slot.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Wait for the current session task to finish.
    ///
    /// Returns immediately when no session was started. A session only
    /// finishes on its own once its retry budget is spent.
    pub async fn wait(&self) {
        let task = self.inner.session.lock().task.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        if let Some(token) = self.inner.session.lock().cancel.take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionController")
            .field("base_url", &self.inner.config.base_url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Session Task
// =============================================================================

impl Inner {
    /// Publish `state` unless the session owning `token` was superseded.
    fn announce(&self, token: &CancellationToken, state: ConnectionState) -> bool {
        let _guard = self.transition.lock();
        if token.is_cancelled() {
            return false;
        }

        *self.state.write() = state;
        metrics::set_connection_state(state);
        self.registry.notify(state);
        true
    }

    async fn run_session(self: Arc<Self>, url: String, token: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if !self.announce(&token, ConnectionState::Connecting) {
                return;
            }
            tracing::info!(url = %url, attempt = policy.attempt_count(), "Connecting to market stream");

            let connected = tokio::select! {
                () = token.cancelled() => return,
                result = self.connector.connect(&url) => result,
            };

            let end = match connected {
                Ok(socket) => {
                    policy.reset();
                    if !self.announce(&token, ConnectionState::Connected) {
                        return;
                    }
                    tracing::info!(url = %url, "Market stream connected");
                    self.run_socket(socket, &token).await
                }
                Err(e) => SessionEnd::Failed(e),
            };

            match end {
                SessionEnd::Cancelled => return,
                SessionEnd::Closed => {
                    tracing::warn!("Market stream closed by server");
                }
                SessionEnd::Failed(e) => {
                    tracing::warn!(error = %e, "Market stream connection error");
                    if !self.announce(&token, ConnectionState::Error) {
                        return;
                    }
                }
            }

            if !self.announce(&token, ConnectionState::Disconnected) {
                return;
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    url = %url,
                    attempts = policy.attempt_count(),
                    "Reconnect attempts exhausted, staying disconnected"
                );
                metrics::record_reconnects_exhausted();
                return;
            };

            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling reconnect"
            );

            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!("Reconnect cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run_socket(&self, socket: Socket, token: &CancellationToken) -> SessionEnd {
        let Socket {
            mut sink,
            mut stream,
        } = socket;

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel(HEARTBEAT_CHANNEL_CAPACITY);
        let heartbeat_cancel = token.child_token();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );
        let _stop_heartbeat = heartbeat_cancel.drop_guard();
        let mut heartbeat_alive = true;

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_SEND_TIMEOUT, sink.send(Message::Close(None))).await;
                    return SessionEnd::Cancelled;
                }

                event = heartbeat_rx.recv(), if heartbeat_alive => match event {
                    Some(HeartbeatEvent::SendPing) => {
                        if token.is_cancelled() {
                            continue;
                        }
                        heartbeat_state.mark_ping_sent();
                        if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                            return SessionEnd::Failed(e);
                        }
                        metrics::record_ping_sent();
                        tracing::trace!("Keepalive ping sent");
                    }
                    Some(HeartbeatEvent::Timeout) => {
                        let timeout = self.config.heartbeat.pong_timeout.unwrap_or_default();
                        return SessionEnd::Failed(TransportError::PongTimeout {
                            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    None => heartbeat_alive = false,
                },

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str(), token),
                    Some(Ok(Message::Binary(data))) => {
                        tracing::debug!(bytes = data.len(), "Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sink.send(Message::Pong(payload)).await {
                            return SessionEnd::Failed(e);
                        }
                    }
                    Some(Ok(Message::Pong(_))) => heartbeat_state.record_pong(),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(frame = ?frame, "Received close frame");
                        return SessionEnd::Closed;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    None => return SessionEnd::Closed,
                },
            }
        }
    }

    fn handle_text(&self, text: &str, token: &CancellationToken) {
        metrics::record_frame_received();

        let event = match parse_inbound_frame(text) {
            Ok(event) => event,
            Err(e) => {
                metrics::record_parse_failure(e.kind());
                tracing::warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };

        if token.is_cancelled() {
            return;
        }

        if self.registry.dispatch(&event) {
            metrics::record_event_dispatched(event.channel());
        } else {
            tracing::trace!(stream = %event.stream_key(), "No handler for event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::streaming::trade_stream_key;
    use crate::infrastructure::transport::InMemoryConnector;

    fn controller(connector: &Arc<InMemoryConnector>) -> (ConnectionController, Arc<SubscriptionRegistry>) {
        let registry = Arc::new(SubscriptionRegistry::new());
        let controller = ConnectionController::new(
            ConnectionConfig::new("wss://stream.test"),
            Arc::clone(connector) as Arc<dyn Connector>,
            Arc::clone(&registry),
        );
        (controller, registry)
    }

    #[test]
    fn starts_idle_and_disconnected() {
        let connector = Arc::new(InMemoryConnector::new());
        let (controller, _) = controller(&connector);

        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(controller.streams().is_empty());
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn empty_stream_set_is_rejected() {
        let connector = Arc::new(InMemoryConnector::new());
        let (controller, _) = controller(&connector);

        assert_eq!(controller.connect(Vec::new()), Err(StreamKeyError::EmptyStreamSet));
        tokio::task::yield_now().await;
        assert_eq!(connector.attempt_count(), 0);
    }

    #[tokio::test]
    async fn connect_opens_url_for_streams() {
        let connector = Arc::new(InMemoryConnector::new());
        let (controller, _) = controller(&connector);

        controller.connect(vec![trade_stream_key("BTCUSDT")]).unwrap();
        let peer = connector.accept().await.unwrap();

        assert_eq!(peer.url(), "wss://stream.test/ws/btcusdt@trade");
        assert_eq!(controller.streams(), vec![trade_stream_key("BTCUSDT")]);
        assert!(controller.is_running());
    }

    #[tokio::test]
    async fn disconnect_clears_handlers_and_closes_socket() {
        let connector = Arc::new(InMemoryConnector::new());
        let (controller, registry) = controller(&connector);
        registry.subscribe_trade("BTCUSDT", Arc::new(|_| {}));

        let observed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&observed);
        let _handle = registry.on_connection_change(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        controller.connect(vec![trade_stream_key("BTCUSDT")]).unwrap();
        let mut peer = connector.accept().await.unwrap();
        while controller.state() != ConnectionState::Connected {
            tokio::task::yield_now().await;
        }

        controller.disconnect();

        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert_eq!(registry.trade_count(), 0);
        assert_eq!(registry.observer_count(), 1);
        assert!(controller.streams().is_empty());

        assert_eq!(peer.recv().await, Some(Message::Close(None)));
        assert_eq!(peer.recv().await, None);

        // Connecting, Connected, Disconnected
        assert_eq!(observed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn disconnect_when_idle_notifies_nobody() {
        let connector = Arc::new(InMemoryConnector::new());
        let (controller, registry) = controller(&connector);

        let observed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&observed);
        let _handle = registry.on_connection_change(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        controller.disconnect();
        controller.disconnect();

        assert_eq!(observed.load(Ordering::SeqCst), 0);
    }
}
