//! Subscription Registry
//!
//! Maps stream keys to the single handler that consumes them, and keeps
//! the ordered list of connection state observers.
//!
//! # Design
//!
//! The registry tracks:
//! - One kline handler per `symbol@kline_interval` key
//! - One trade handler per `symbol@trade` key
//! - Connection observers, called in registration order
//!
//! Entries are added and removed independently of the physical connection.
//! Registering a second handler for a key replaces the first. Every
//! registration gets a [`SubscriptionId`] so a consumer can remove its own
//! entry without clobbering a newer one registered under the same key.
//!
//! Handlers are cloned out of the lock before they run, so a handler may
//! subscribe or unsubscribe without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::domain::streaming::{
    ChannelKind, ConnectionState, KlineUpdate, MarketEvent, StreamKey, TradeTick,
};

// =============================================================================
// Types
// =============================================================================

/// Identifier of one handler registration.
pub type SubscriptionId = u64;

/// Identifier of one observer registration.
pub type ObserverId = u64;

/// Consumer of kline updates for one key.
pub type KlineHandler = Arc<dyn Fn(&KlineUpdate) + Send + Sync>;

/// Consumer of trades for one key.
pub type TradeHandler = Arc<dyn Fn(&TradeTick) + Send + Sync>;

/// Consumer of connection state transitions.
pub type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;

type ObserverList = RwLock<Vec<(ObserverId, StateObserver)>>;

struct Entry<H> {
    id: SubscriptionId,
    handler: H,
}

// =============================================================================
// Observer Handle
// =============================================================================

/// Removes one connection observer.
///
/// Removal is exactly-once: the first [`ObserverHandle::remove`] detaches
/// the observer and later calls do nothing. Dropping the handle does not
/// remove the observer.
pub struct ObserverHandle {
    id: ObserverId,
    observers: Weak<ObserverList>,
    removed: AtomicBool,
}

impl ObserverHandle {
    /// Detach the observer.
    ///
    /// Returns `true` if this call removed it.
    pub fn remove(&self) -> bool {
        if self.removed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let Some(observers) = self.observers.upgrade() else {
            return false;
        };

        let mut observers = observers.write();
        let before = observers.len();
        observers.retain(|(id, _)| *id != self.id);
        observers.len() != before
    }

    /// Whether [`ObserverHandle::remove`] has been called.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("id", &self.id)
            .field("removed", &self.is_removed())
            .finish()
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Stream key to handler registry plus connection observers.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use market_stream::domain::streaming::{MarketEvent, TradeTick};
/// use market_stream::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
/// let seen = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&seen);
/// registry.subscribe_trade("BTCUSDT", Arc::new(move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }));
///
/// let trade = TradeTick {
///     symbol: "BTCUSDT".to_string(),
///     price: 50_000.0,
///     quantity: 0.1,
///     event_time_ms: 0,
///     is_buyer_maker: false,
/// };
/// assert!(registry.dispatch(&MarketEvent::Trade(trade)));
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
///
/// registry.unsubscribe_trade("btcusdt");
/// assert_eq!(registry.trade_count(), 0);
/// ```
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    klines: RwLock<HashMap<StreamKey, Entry<KlineHandler>>>,
    trades: RwLock<HashMap<StreamKey, Entry<TradeHandler>>>,
    observers: Arc<ObserverList>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            klines: RwLock::new(HashMap::new()),
            trades: RwLock::new(HashMap::new()),
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register the kline handler for `symbol` at `interval`, replacing any
    /// previous one.
    pub fn subscribe_kline(
        &self,
        symbol: &str,
        interval: &str,
        handler: KlineHandler,
    ) -> SubscriptionId {
        let key = StreamKey::kline(symbol, interval);
        let id = self.allocate_id();

        let replaced = self.klines.write().insert(key.clone(), Entry { id, handler });
        tracing::debug!(stream = %key, replaced = replaced.is_some(), "Kline handler registered");

        id
    }

    /// Register the trade handler for `symbol`, replacing any previous one.
    pub fn subscribe_trade(&self, symbol: &str, handler: TradeHandler) -> SubscriptionId {
        let key = StreamKey::trade(symbol);
        let id = self.allocate_id();

        let replaced = self.trades.write().insert(key.clone(), Entry { id, handler });
        tracing::debug!(stream = %key, replaced = replaced.is_some(), "Trade handler registered");

        id
    }

    /// Remove the kline handler for `symbol` at `interval`.
    ///
    /// Returns `false` if none was registered.
    pub fn unsubscribe_kline(&self, symbol: &str, interval: &str) -> bool {
        self.klines
            .write()
            .remove(&StreamKey::kline(symbol, interval))
            .is_some()
    }

    /// Remove the trade handler for `symbol`.
    ///
    /// Returns `false` if none was registered.
    pub fn unsubscribe_trade(&self, symbol: &str) -> bool {
        self.trades.write().remove(&StreamKey::trade(symbol)).is_some()
    }

    /// Remove the handler under `key` only if it is still registration `id`.
    ///
    /// A consumer whose handler was replaced by someone else leaves the
    /// newer handler in place.
    pub fn unsubscribe_owned(&self, key: &StreamKey, id: SubscriptionId) -> bool {
        match key.channel() {
            ChannelKind::Kline => remove_if_owned(&mut self.klines.write(), key, id),
            ChannelKind::Trade => remove_if_owned(&mut self.trades.write(), key, id),
        }
    }

    /// Route `event` to the handler registered for its key.
    ///
    /// Returns `false` when no handler is registered; the event is dropped.
    pub fn dispatch(&self, event: &MarketEvent) -> bool {
        let key = event.stream_key();

        match event {
            MarketEvent::Kline(update) => {
                let handler = self.klines.read().get(&key).map(|e| Arc::clone(&e.handler));
                handler.is_some_and(|handler| {
                    handler(update);
                    true
                })
            }
            MarketEvent::Trade(trade) => {
                let handler = self.trades.read().get(&key).map(|e| Arc::clone(&e.handler));
                handler.is_some_and(|handler| {
                    handler(trade);
                    true
                })
            }
        }
    }

    /// Register a connection state observer.
    pub fn on_connection_change(&self, observer: StateObserver) -> ObserverHandle {
        let id = self.allocate_id();
        self.observers.write().push((id, observer));

        ObserverHandle {
            id,
            observers: Arc::downgrade(&self.observers),
            removed: AtomicBool::new(false),
        }
    }

    /// Call every observer with `state`, in registration order.
    pub fn notify(&self, state: ConnectionState) {
        let observers: Vec<StateObserver> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            observer(state);
        }
    }

    /// Every key with a registered handler, sorted.
    #[must_use]
    pub fn desired_streams(&self) -> Vec<StreamKey> {
        let mut keys: Vec<StreamKey> = self.klines.read().keys().cloned().collect();
        keys.extend(self.trades.read().keys().cloned());
        keys.sort();
        keys
    }

    /// Whether a handler is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &StreamKey) -> bool {
        match key.channel() {
            ChannelKind::Kline => self.klines.read().contains_key(key),
            ChannelKind::Trade => self.trades.read().contains_key(key),
        }
    }

    /// Remove every kline and trade handler. Observers are kept.
    pub fn clear(&self) {
        self.klines.write().clear();
        self.trades.write().clear();
    }

    /// Remove every observer.
    pub fn clear_observers(&self) {
        self.observers.write().clear();
    }

    /// Number of kline handlers.
    #[must_use]
    pub fn kline_count(&self) -> usize {
        self.klines.read().len()
    }

    /// Number of trade handlers.
    #[must_use]
    pub fn trade_count(&self) -> usize {
        self.trades.read().len()
    }

    /// Number of observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

fn remove_if_owned<H>(
    entries: &mut HashMap<StreamKey, Entry<H>>,
    key: &StreamKey,
    id: SubscriptionId,
) -> bool {
    if entries.get(key).is_some_and(|entry| entry.id == id) {
        entries.remove(key);
        true
    } else {
        false
    }
}
