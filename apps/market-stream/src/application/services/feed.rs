//! Live Market Feed
//!
//! One consumer's view of a symbol: its kline and trade handlers, the
//! subscriptions backing them, and a watch channel carrying the connection
//! state. Dropping the feed detaches everything it registered.

use std::sync::Arc;

use tokio::sync::watch;

use crate::application::services::manager::StreamManager;
use crate::domain::streaming::{
    ConnectionState, KlineUpdate, StreamKey, StreamKeyError, TradeTick, kline_stream_key,
    trade_stream_key,
};
use crate::domain::subscription::{
    KlineHandler, ObserverHandle, SubscriptionId, SubscriptionRegistry, TradeHandler,
};

/// A symbol/interval subscription pair bound to a [`StreamManager`].
pub struct LiveMarketFeed {
    manager: Arc<StreamManager>,
    symbol: String,
    interval: String,
    on_kline: KlineHandler,
    on_trade: TradeHandler,
    kline_subscription: SubscriptionId,
    trade_subscription: SubscriptionId,
    observer: ObserverHandle,
    state_rx: watch::Receiver<ConnectionState>,
}

impl LiveMarketFeed {
    /// Subscribe to `symbol`'s kline stream at `interval` and its trade
    /// stream, then connect with the manager's full desired set.
    ///
    /// # Errors
    ///
    /// Returns an error only if the desired set is empty, which cannot
    /// happen after the two subscriptions succeed.
    pub fn attach<K, T>(
        manager: Arc<StreamManager>,
        symbol: &str,
        interval: &str,
        on_kline: K,
        on_trade: T,
    ) -> Result<Self, StreamKeyError>
    where
        K: Fn(&KlineUpdate) + Send + Sync + 'static,
        T: Fn(&TradeTick) + Send + Sync + 'static,
    {
        let (state_tx, state_rx) = watch::channel(manager.state());
        let observer = manager.on_connection_change(move |state| {
            state_tx.send_replace(state);
        });

        let on_kline: KlineHandler = Arc::new(on_kline);
        let on_trade: TradeHandler = Arc::new(on_trade);
        let (kline_subscription, trade_subscription) = manager.update_subscriptions(|registry| {
            subscribe_pair(registry, symbol, interval, &on_kline, &on_trade)
        });

        let feed = Self {
            manager,
            symbol: symbol.to_uppercase(),
            interval: interval.to_string(),
            on_kline,
            on_trade,
            kline_subscription,
            trade_subscription,
            observer,
            state_rx,
        };

        tracing::info!(symbol = %feed.symbol, interval = %feed.interval, "Live feed attached");
        feed.manager.connect_desired()?;
        Ok(feed)
    }

    /// Move the feed to another symbol and interval.
    ///
    /// The old subscriptions are swapped for the new ones in a single
    /// registry update, so the manager reconnects at most once with the
    /// updated desired set.
    ///
    /// # Errors
    ///
    /// Same as [`LiveMarketFeed::attach`].
    pub fn switch(&mut self, symbol: &str, interval: &str) -> Result<(), StreamKeyError> {
        if self.symbol.eq_ignore_ascii_case(symbol) && self.interval == interval {
            return Ok(());
        }

        let [old_kline, old_trade] = self.stream_keys();
        let (kline_subscription, trade_subscription) = self.manager.update_subscriptions(|registry| {
            registry.unsubscribe_owned(&old_kline, self.kline_subscription);
            registry.unsubscribe_owned(&old_trade, self.trade_subscription);
            subscribe_pair(registry, symbol, interval, &self.on_kline, &self.on_trade)
        });
        self.kline_subscription = kline_subscription;
        self.trade_subscription = trade_subscription;

        tracing::info!(
            from = %self.symbol,
            to = %symbol.to_uppercase(),
            interval,
            "Live feed switched"
        );
        self.symbol = symbol.to_uppercase();
        self.interval = interval.to_string();

        self.manager.connect_desired()
    }

    /// Receiver of connection state changes.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Latest connection state.
    #[must_use]
    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Upper-case symbol currently followed.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Kline interval currently followed.
    #[must_use]
    pub fn interval(&self) -> &str {
        &self.interval
    }

    /// Keys this feed subscribes to.
    #[must_use]
    pub fn stream_keys(&self) -> [StreamKey; 2] {
        [
            kline_stream_key(&self.symbol, &self.interval),
            trade_stream_key(&self.symbol),
        ]
    }

    fn release_subscriptions(&self) {
        let [kline_key, trade_key] = self.stream_keys();
        self.manager.update_subscriptions(|registry| {
            registry.unsubscribe_owned(&kline_key, self.kline_subscription);
            registry.unsubscribe_owned(&trade_key, self.trade_subscription);
        });
    }
}

impl Drop for LiveMarketFeed {
    fn drop(&mut self) {
        self.release_subscriptions();
        self.observer.remove();
        tracing::debug!(symbol = %self.symbol, "Live feed detached");
    }
}

impl std::fmt::Debug for LiveMarketFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveMarketFeed")
            .field("symbol", &self.symbol)
            .field("interval", &self.interval)
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

fn subscribe_pair(
    registry: &SubscriptionRegistry,
    symbol: &str,
    interval: &str,
    on_kline: &KlineHandler,
    on_trade: &TradeHandler,
) -> (SubscriptionId, SubscriptionId) {
    (
        registry.subscribe_kline(symbol, interval, Arc::clone(on_kline)),
        registry.subscribe_trade(symbol, Arc::clone(on_trade)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::Connector;
    use crate::infrastructure::config::{StreamConfig, StreamSetMode};
    use crate::infrastructure::transport::InMemoryConnector;

    fn manager() -> (Arc<StreamManager>, Arc<InMemoryConnector>) {
        manager_in(StreamSetMode::Manual)
    }

    fn manager_in(mode: StreamSetMode) -> (Arc<StreamManager>, Arc<InMemoryConnector>) {
        let connector = Arc::new(InMemoryConnector::new());
        let config = StreamConfig {
            base_url: "wss://stream.test".to_string(),
            mode,
            ..StreamConfig::default()
        };
        let manager = StreamManager::with_connector(&config, Arc::clone(&connector) as Arc<dyn Connector>);
        (Arc::new(manager), connector)
    }

    #[tokio::test]
    async fn attach_subscribes_and_connects() {
        let (manager, connector) = manager();

        let feed = LiveMarketFeed::attach(Arc::clone(&manager), "btcusdt", "1m", |_| {}, |_| {})
            .unwrap();

        let peer = connector.accept().await.unwrap();
        assert_eq!(
            peer.url(),
            "wss://stream.test/stream?streams=btcusdt@kline_1m/btcusdt@trade"
        );
        assert_eq!(feed.symbol(), "BTCUSDT");
        assert_eq!(manager.registry().observer_count(), 1);
    }

    #[tokio::test]
    async fn state_channel_follows_connection() {
        let (manager, connector) = manager();
        let feed =
            LiveMarketFeed::attach(Arc::clone(&manager), "BTCUSDT", "1m", |_| {}, |_| {}).unwrap();
        let mut states = feed.connection_state();

        let _peer = connector.accept().await.unwrap();
        while *states.borrow_and_update() != ConnectionState::Connected {
            states.changed().await.unwrap();
        }

        assert_eq!(feed.current_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn switch_moves_subscriptions() {
        let (manager, connector) = manager();
        let mut feed =
            LiveMarketFeed::attach(Arc::clone(&manager), "BTCUSDT", "1m", |_| {}, |_| {}).unwrap();
        let _first = connector.accept().await.unwrap();

        feed.switch("ETHUSDT", "5m").unwrap();

        let second = connector.accept().await.unwrap();
        assert_eq!(
            second.url(),
            "wss://stream.test/stream?streams=ethusdt@kline_5m/ethusdt@trade"
        );
        assert_eq!(
            manager.desired_streams(),
            vec![kline_stream_key("ETHUSDT", "5m"), trade_stream_key("ETHUSDT")]
        );
    }

    #[tokio::test]
    async fn drop_releases_only_own_entries() {
        let (manager, _connector) = manager();
        let feed =
            LiveMarketFeed::attach(Arc::clone(&manager), "BTCUSDT", "1m", |_| {}, |_| {}).unwrap();

        // Someone else takes over the trade key.
        manager.subscribe_trade("BTCUSDT", |_| {});

        drop(feed);

        assert_eq!(manager.desired_streams(), vec![trade_stream_key("BTCUSDT")]);
        assert_eq!(manager.registry().observer_count(), 0);
    }

    #[tokio::test]
    async fn auto_mode_attach_opens_one_socket() {
        let (manager, connector) = manager_in(StreamSetMode::Auto);

        let _feed =
            LiveMarketFeed::attach(Arc::clone(&manager), "BTCUSDT", "1m", |_| {}, |_| {}).unwrap();

        let peer = connector.accept().await.unwrap();
        assert_eq!(
            peer.url(),
            "wss://stream.test/stream?streams=btcusdt@kline_1m/btcusdt@trade"
        );
        assert_eq!(connector.attempt_count(), 1);
    }

    #[tokio::test]
    async fn auto_mode_switch_reconnects_once() {
        let (manager, connector) = manager_in(StreamSetMode::Auto);
        let mut feed =
            LiveMarketFeed::attach(Arc::clone(&manager), "BTCUSDT", "1m", |_| {}, |_| {}).unwrap();
        let _first = connector.accept().await.unwrap();

        feed.switch("ETHUSDT", "5m").unwrap();

        let second = connector.accept().await.unwrap();
        assert_eq!(
            second.url(),
            "wss://stream.test/stream?streams=ethusdt@kline_5m/ethusdt@trade"
        );
        assert_eq!(connector.attempt_count(), 2);
    }
}
