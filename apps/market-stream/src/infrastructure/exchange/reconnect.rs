//! Reconnection Policy
//!
//! Capped exponential backoff for the market stream socket. The n-th retry
//! after a close waits `base * 2^(n-1)`; once the attempt budget is spent
//! the policy yields no further delay and the controller stays
//! disconnected until it is told to connect again.

use std::time::Duration;

use rand::Rng;

/// Delay before the first reconnection attempt.
pub const BASE_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Number of reconnection attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Maximum number of reconnection attempts.
    pub max_attempts: u32,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    /// Zero keeps the delays exact.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: BASE_RECONNECT_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a configuration without jitter.
    #[must_use]
    pub const fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            jitter_factor: 0.0,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            base_delay: settings.reconnect_base_delay,
            max_attempts: settings.max_reconnect_attempts,
            jitter_factor: settings.reconnect_jitter,
        }
    }
}

/// Reconnection policy implementing capped exponential backoff.
///
/// # Example
///
/// ```rust
/// use market_stream::infrastructure::exchange::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Count one more attempt and return how long to wait before it.
    ///
    /// Returns `None` once the attempt budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        Some(self.apply_jitter(self.backoff(self.attempt_count)))
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.attempt_count < self.config.max_attempts
    }

    /// `base * 2^(attempt - 1)`, saturating.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.config.base_delay.saturating_mul(factor)
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
