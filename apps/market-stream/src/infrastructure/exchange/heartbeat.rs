//! Heartbeat Manager
//!
//! Keeps the market stream socket alive with periodic pings. The first ping
//! goes out one full interval after the socket opens. When a pong timeout is
//! configured, an unanswered ping older than the timeout is reported so the
//! session can be closed and retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default interval between keepalive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// How long a ping may go unanswered. `None` disables the check.
    pub pong_timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: None,
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Option<Duration>) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.ping_interval,
            pong_timeout: settings.pong_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Request to send a ping message.
    SendPing,
    /// The last ping went unanswered for longer than the pong timeout.
    Timeout,
}

/// State shared between the heartbeat manager and the session loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_ping: RwLock<Option<Instant>>,
    waiting_for_pong: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_ping: RwLock::new(None),
            waiting_for_pong: AtomicBool::new(false),
        }
    }

    /// Record that a pong was received.
    pub fn record_pong(&self) {
        self.waiting_for_pong.store(false, Ordering::SeqCst);
    }

    /// Mark that a ping went out.
    ///
    /// Only the first unanswered ping is timestamped, so the outstanding
    /// time keeps growing across ticks until a pong arrives.
    pub fn mark_ping_sent(&self) {
        let mut last_ping = self.last_ping.write();
        if !self.waiting_for_pong.swap(true, Ordering::SeqCst) {
            *last_ping = Some(Instant::now());
        }
    }

    /// Check if a ping is outstanding.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong.load(Ordering::SeqCst)
    }

    /// Time since the outstanding ping was sent.
    #[must_use]
    pub fn outstanding_for(&self) -> Option<Duration> {
        if !self.is_waiting_for_pong() {
            return None;
        }
        self.last_ping.read().map(|sent| sent.elapsed())
    }
}

/// Heartbeat manager driving the keepalive timer for one session.
///
/// # Example
///
/// ```rust,no_run
/// use market_stream::infrastructure::exchange::heartbeat::{
///     HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState,
/// };
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let state = Arc::new(HeartbeatState::new());
///     let (event_tx, mut event_rx) = mpsc::channel(10);
///     let cancel = CancellationToken::new();
///
///     let manager =
///         HeartbeatManager::new(HeartbeatConfig::default(), state.clone(), event_tx, cancel);
///     tokio::spawn(manager.run());
///
///     while let Some(event) = event_rx.recv().await {
///         match event {
///             HeartbeatEvent::SendPing => state.mark_ping_sent(),
///             HeartbeatEvent::Timeout => break,
///         }
///     }
/// }
/// ```
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver is dropped, or a timeout is reported.
    pub async fn run(self) {
        let period = self.config.ping_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Check for an overdue pong, then request the next ping.
    ///
    /// Returns `Err(())` when the loop should exit.
    async fn check_and_ping(&self) -> Result<(), ()> {
        if let Some(timeout) = self.config.pong_timeout
            && let Some(elapsed) = self.state.outstanding_for()
            && elapsed > timeout
        {
            tracing::warn!(
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "Heartbeat timeout detected"
            );
            let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
            return Err(());
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return Err(());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.pong_timeout, None);
    }

    #[test]
    fn state_tracks_outstanding_ping() {
        let state = HeartbeatState::new();
        assert!(!state.is_waiting_for_pong());
        assert!(state.outstanding_for().is_none());

        state.mark_ping_sent();
        assert!(state.is_waiting_for_pong());
        assert!(state.outstanding_for().is_some());

        state.record_pong();
        assert!(!state.is_waiting_for_pong());
        assert!(state.outstanding_for().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn first_ping_waits_one_interval() {
        let config = HeartbeatConfig::new(Duration::from_secs(30), None);
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager =
            HeartbeatManager::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone());

        let started = Instant::now();
        let handle = tokio::spawn(manager.run());

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event, HeartbeatEvent::SendPing);
        let first = started.elapsed();
        assert!(first >= Duration::from_secs(30) && first < Duration::from_secs(31));

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event, HeartbeatEvent::SendPing);
        let second = started.elapsed();
        assert!(second >= Duration::from_secs(60) && second < Duration::from_secs(61));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_ping_times_out() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Some(Duration::from_secs(5)));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(config, Arc::clone(&state), event_tx, cancel);

        let handle = tokio::spawn(manager.run());

        assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::SendPing));
        state.mark_ping_sent();

        assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::Timeout));
        handle.await.unwrap();
        assert_eq!(event_rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_pings_keep_first_send_time() {
        let state = HeartbeatState::new();

        state.mark_ping_sent();
        tokio::time::advance(Duration::from_secs(10)).await;
        state.mark_ping_sent();
        tokio::time::advance(Duration::from_secs(10)).await;

        let outstanding = state.outstanding_for().unwrap();
        assert!(outstanding >= Duration::from_secs(20));

        state.record_pong();
        state.mark_ping_sent();
        assert!(state.outstanding_for().unwrap() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_longer_than_interval_fires() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Some(Duration::from_secs(25)));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(config, Arc::clone(&state), event_tx, cancel);

        let started = Instant::now();
        let handle = tokio::spawn(manager.run());

        // Silent peer: pings at 10s, 20s and 30s all go unanswered.
        for _ in 0..3 {
            assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::SendPing));
            state.mark_ping_sent();
        }

        assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::Timeout));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(40) && elapsed < Duration::from_secs(41));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn answered_ping_keeps_running() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Some(Duration::from_secs(5)));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(config, Arc::clone(&state), event_tx, cancel.clone());

        let handle = tokio::spawn(manager.run());

        for _ in 0..3 {
            assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::SendPing));
            state.mark_ping_sent();
            state.record_pong();
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn manager_cancellation() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), None);
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let manager =
            HeartbeatManager::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }
}
