//! Stream Manager
//!
//! The single object consumers talk to. It owns the subscription registry
//! and the connection controller, and decides when registry changes reach
//! the wire according to its [`StreamSetMode`].

use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::ports::Connector;
use crate::domain::streaming::{
    ConnectionState, KlineUpdate, StreamKey, StreamKeyError, TradeTick,
};
use crate::domain::subscription::{ObserverHandle, SubscriptionId, SubscriptionRegistry};
use crate::infrastructure::config::{StreamConfig, StreamSetMode};
use crate::infrastructure::exchange::{
    ConnectionConfig, ConnectionController, HeartbeatConfig, ReconnectConfig,
};
use crate::infrastructure::transport::TungsteniteConnector;

/// Multiplexes kline and trade subscriptions over one exchange socket.
///
/// In [`StreamSetMode::Manual`] the registry and the socket are independent:
/// subscribing only records a handler, and the caller applies the aggregate
/// stream list with [`StreamManager::connect`] or
/// [`StreamManager::connect_desired`]. In [`StreamSetMode::Auto`] every
/// change to the key set reconnects with the full desired set, and an empty
/// set closes the socket.
///
/// Methods that may open a socket must be called within a tokio runtime.
pub struct StreamManager {
    registry: Arc<SubscriptionRegistry>,
    controller: ConnectionController,
    mode: StreamSetMode,
}

impl StreamManager {
    /// Create a manager connecting over real WebSockets.
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        Self::with_connector(config, Arc::new(TungsteniteConnector::new()))
    }

    /// Create a manager using `connector` for its sockets.
    #[must_use]
    pub fn with_connector(config: &StreamConfig, connector: Arc<dyn Connector>) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let connection = ConnectionConfig {
            base_url: config.base_url.clone(),
            reconnect: ReconnectConfig::from_websocket_settings(&config.websocket),
            heartbeat: HeartbeatConfig::from_websocket_settings(&config.websocket),
        };

        Self {
            controller: ConnectionController::new(connection, connector, Arc::clone(&registry)),
            registry,
            mode: config.mode,
        }
    }

    /// Registry-to-socket policy.
    #[must_use]
    pub const fn mode(&self) -> StreamSetMode {
        self.mode
    }

    /// Route kline updates for `symbol` at `interval` to `handler`,
    /// replacing any previous handler for that key.
    pub fn subscribe_kline<F>(&self, symbol: &str, interval: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&KlineUpdate) + Send + Sync + 'static,
    {
        let id = self
            .registry
            .subscribe_kline(symbol, interval, Arc::new(handler));
        self.apply_registry_change();
        id
    }

    /// Stop routing kline updates for `symbol` at `interval`.
    pub fn unsubscribe_kline(&self, symbol: &str, interval: &str) {
        if self.registry.unsubscribe_kline(symbol, interval) {
            self.apply_registry_change();
        }
    }

    /// Route trades for `symbol` to `handler`, replacing any previous
    /// handler for that key.
    pub fn subscribe_trade<F>(&self, symbol: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&TradeTick) + Send + Sync + 'static,
    {
        let id = self.registry.subscribe_trade(symbol, Arc::new(handler));
        self.apply_registry_change();
        id
    }

    /// Stop routing trades for `symbol`.
    pub fn unsubscribe_trade(&self, symbol: &str) {
        if self.registry.unsubscribe_trade(symbol) {
            self.apply_registry_change();
        }
    }

    /// Remove the handler under `key` only if it is still registration `id`.
    pub fn unsubscribe_owned(&self, key: &StreamKey, id: SubscriptionId) -> bool {
        let removed = self.registry.unsubscribe_owned(key, id);
        if removed {
            self.apply_registry_change();
        }
        removed
    }

    /// Make several registry changes, then apply the resulting set once.
    ///
    /// In [`StreamSetMode::Auto`] the socket is reconciled after `change`
    /// returns, so a swap of keys costs one reconnect. In Manual mode this
    /// only edits the registry.
    pub fn update_subscriptions<R>(&self, change: impl FnOnce(&SubscriptionRegistry) -> R) -> R {
        let result = change(&self.registry);
        self.apply_registry_change();
        result
    }

    /// Open (or reopen) the socket carrying exactly `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamKeyError::EmptyStreamSet`] if `keys` is empty.
    pub fn connect(&self, keys: Vec<StreamKey>) -> Result<(), StreamKeyError> {
        self.controller.connect(keys)
    }

    /// Connect with every key that currently has a handler.
    ///
    /// Does nothing if a session already carries exactly that set.
    ///
    /// # Errors
    ///
    /// Returns [`StreamKeyError::EmptyStreamSet`] if nothing is subscribed.
    pub fn connect_desired(&self) -> Result<(), StreamKeyError> {
        let desired = self.registry.desired_streams();
        if desired.is_empty() {
            return Err(StreamKeyError::EmptyStreamSet);
        }
        if self.controller.is_running() && self.controller.streams() == desired {
            return Ok(());
        }
        self.controller.connect(desired)
    }

    /// Close the socket, cancel reconnects and drop every handler.
    ///
    /// Connection observers stay registered.
    pub fn disconnect(&self) {
        self.controller.disconnect();
    }

    /// Observe connection state transitions.
    pub fn on_connection_change<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.registry.on_connection_change(Arc::new(observer))
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    /// Every key with a registered handler, sorted.
    #[must_use]
    pub fn desired_streams(&self) -> Vec<StreamKey> {
        self.registry.desired_streams()
    }

    /// Streams carried by the current session.
    #[must_use]
    pub fn active_streams(&self) -> Vec<StreamKey> {
        self.controller.streams()
    }

    /// The handler registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Disconnect and drop every observer.
    pub fn shutdown(&self) {
        self.controller.disconnect();
        self.registry.clear_observers();
    }

    fn apply_registry_change(&self) {
        if self.mode != StreamSetMode::Auto {
            return;
        }

        let desired = self.registry.desired_streams();
        if desired.is_empty() {
            tracing::debug!("No streams left, closing socket");
            self.controller.close();
            return;
        }

        if self.controller.is_running() && self.controller.streams() == desired {
            return;
        }

        tracing::debug!(streams = desired.len(), "Stream set changed, reconnecting");
        if let Err(e) = self.controller.connect(desired) {
            tracing::warn!(error = %e, "Failed to apply stream set");
        }
    }
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("mode", &self.mode)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Process-wide Slot
// =============================================================================

/// Holder of the process's shared [`StreamManager`].
///
/// The manager is created on first [`StreamManagerSlot::instance`] call and
/// torn down by [`StreamManagerSlot::destroy`]. After a destroy the next
/// `instance` call builds a fresh manager.
pub struct StreamManagerSlot {
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    instance: Mutex<Option<Arc<StreamManager>>>,
}

impl StreamManagerSlot {
    /// Create an empty slot whose manager connects over real WebSockets.
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self::with_connector(config, Arc::new(TungsteniteConnector::new()))
    }

    /// Create an empty slot whose manager uses `connector`.
    #[must_use]
    pub fn with_connector(config: StreamConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            instance: Mutex::new(None),
        }
    }

    /// The shared manager, created on first use.
    #[must_use]
    pub fn instance(&self) -> Arc<StreamManager> {
        let mut slot = self.instance.lock();
        let manager = slot.get_or_insert_with(|| {
            tracing::debug!(mode = self.config.mode.as_str(), "Creating stream manager");
            Arc::new(StreamManager::with_connector(
                &self.config,
                Arc::clone(&self.connector),
            ))
        });
        Arc::clone(manager)
    }

    /// The shared manager, if one exists.
    #[must_use]
    pub fn get(&self) -> Option<Arc<StreamManager>> {
        self.instance.lock().clone()
    }

    /// Shut down and forget the shared manager.
    ///
    /// Returns `false` if there was nothing to destroy.
    pub fn destroy(&self) -> bool {
        let Some(manager) = self.instance.lock().take() else {
            return false;
        };

        manager.shutdown();
        tracing::debug!("Stream manager destroyed");
        true
    }
}

impl std::fmt::Debug for StreamManagerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManagerSlot")
            .field("config", &self.config)
            .field("initialized", &self.instance.lock().is_some())
            .finish_non_exhaustive()
    }
}
