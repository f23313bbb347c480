//! Stream Configuration Settings
//!
//! Configuration types for the market stream client, loaded from
//! environment variables by the binary. The library itself never reads
//! the environment; `StreamConfig::default()` matches the documented
//! constants.

use std::time::Duration;

use crate::infrastructure::exchange::heartbeat::DEFAULT_PING_INTERVAL;
use crate::infrastructure::exchange::reconnect::{BASE_RECONNECT_DELAY, MAX_RECONNECT_ATTEMPTS};

/// Public testnet stream endpoint.
pub const DEFAULT_BASE_URL: &str = "wss://stream.testnet.binance.vision";

/// How the stream manager applies registry changes to the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamSetMode {
    /// Only an explicit `connect` changes the streams on the wire.
    #[default]
    Manual,
    /// Every subscribe/unsubscribe that changes the key set reconnects
    /// with the full desired set.
    Auto,
}

impl StreamSetMode {
    /// Parse mode from string, ignoring case.
    ///
    /// Returns `None` for anything other than `manual` or `auto`.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

impl std::str::FromStr for StreamSetMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_case_insensitive(s).ok_or(UnknownMode)
    }
}

/// A mode name other than `manual` or `auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stream set mode must be manual or auto")]
pub struct UnknownMode;

/// WebSocket connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketSettings {
    /// Keepalive ping interval.
    pub ping_interval: Duration,
    /// How long a ping may go unanswered (`None` = never time out).
    pub pong_timeout: Option<Duration>,
    /// Delay before the first reconnection attempt; doubles per attempt.
    pub reconnect_base_delay: Duration,
    /// Reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Randomization applied to each reconnect delay, as a fraction in
    /// `0.0..=1.0` (0.1 = ±10%). Zero keeps the delays exact.
    pub reconnect_jitter: f64,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: None,
            reconnect_base_delay: BASE_RECONNECT_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_jitter: 0.0,
        }
    }
}

/// Complete stream manager configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Stream endpoint base URL.
    pub base_url: String,
    /// Symbol shown by the live feed.
    pub symbol: String,
    /// Kline interval shown by the live feed.
    pub interval: String,
    /// Registry-to-socket policy.
    pub mode: StreamSetMode,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            symbol: "BTCUSDT".to_string(),
            interval: "1m".to_string(),
            mode: StreamSetMode::Manual,
            websocket: WebSocketSettings::default(),
            metrics_port: 0,
        }
    }
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an empty or unparseable
    /// value, or the base URL is not a WebSocket URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unset keys take their defaults.
    ///
    /// # Errors
    ///
    /// Same as [`StreamConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let env = EnvReader { lookup: &lookup };

        let base_url = env
            .non_empty("MARKET_STREAM_BASE_URL")?
            .unwrap_or(defaults.base_url);
        if !(base_url.starts_with("ws://") || base_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(base_url));
        }

        let websocket = WebSocketSettings {
            ping_interval: env
                .parsed::<u64>("MARKET_STREAM_PING_INTERVAL_SECS")?
                .map_or(defaults.websocket.ping_interval, Duration::from_secs),
            pong_timeout: match env.parsed::<u64>("MARKET_STREAM_PONG_TIMEOUT_SECS")? {
                Some(0) | None => None,
                Some(secs) => Some(Duration::from_secs(secs)),
            },
            reconnect_base_delay: env
                .parsed::<u64>("MARKET_STREAM_RECONNECT_BASE_MS")?
                .map_or(defaults.websocket.reconnect_base_delay, Duration::from_millis),
            max_reconnect_attempts: env
                .parsed("MARKET_STREAM_MAX_RECONNECT_ATTEMPTS")?
                .unwrap_or(defaults.websocket.max_reconnect_attempts),
            reconnect_jitter: env
                .fraction("MARKET_STREAM_RECONNECT_JITTER")?
                .unwrap_or(defaults.websocket.reconnect_jitter),
        };

        Ok(Self {
            base_url,
            symbol: env
                .non_empty("MARKET_STREAM_SYMBOL")?
                .map_or(defaults.symbol, |s| s.to_uppercase()),
            interval: env
                .non_empty("MARKET_STREAM_INTERVAL")?
                .unwrap_or(defaults.interval),
            mode: env
                .parsed("MARKET_STREAM_MODE")?
                .unwrap_or(defaults.mode),
            websocket,
            metrics_port: env
                .parsed("MARKET_STREAM_METRICS_PORT")?
                .unwrap_or(defaults.metrics_port),
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Base URL is not a `ws://` or `wss://` URL.
    #[error("stream base URL must start with ws:// or wss://, got {0:?}")]
    InvalidUrl(String),
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn non_empty(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match (self.lookup)(key) {
            None => Ok(None),
            Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(value) => Ok(Some(value.trim().to_string())),
        }
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.non_empty(key)?
            .map(|value| {
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn fraction(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        match self.parsed::<f64>(key)? {
            Some(value) if !(0.0..=1.0).contains(&value) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            }),
            value => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn stream_set_mode_parsing() {
        assert_eq!(StreamSetMode::from_str_case_insensitive("auto"), Some(StreamSetMode::Auto));
        assert_eq!(StreamSetMode::from_str_case_insensitive(" AUTO "), Some(StreamSetMode::Auto));
        assert_eq!(
            StreamSetMode::from_str_case_insensitive("Manual"),
            Some(StreamSetMode::Manual)
        );
        assert_eq!(StreamSetMode::from_str_case_insensitive("other"), None);
        assert_eq!("auto".parse::<StreamSetMode>(), Ok(StreamSetMode::Auto));
        assert_eq!("atuo".parse::<StreamSetMode>(), Err(UnknownMode));
        assert_eq!(StreamSetMode::Auto.as_str(), "auto");
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err =
            StreamConfig::from_lookup(lookup(&[("MARKET_STREAM_MODE", "atuo")])).unwrap_err();

        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "MARKET_STREAM_MODE".to_string(),
                value: "atuo".to_string(),
            }
        );
    }

    #[test]
    fn reconnect_jitter_is_read() {
        let config =
            StreamConfig::from_lookup(lookup(&[("MARKET_STREAM_RECONNECT_JITTER", "0.2")])).unwrap();
        assert!((config.websocket.reconnect_jitter - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_jitter_is_rejected() {
        for raw in ["1.5", "-0.1", "NaN", "inf"] {
            let err = StreamConfig::from_lookup(lookup(&[("MARKET_STREAM_RECONNECT_JITTER", raw)]))
                .unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidValue { key, .. } if key == "MARKET_STREAM_RECONNECT_JITTER"),
                "{raw} gave {err:?}"
            );
        }
    }

    #[test]
    fn defaults_match_constants() {
        let config = StreamConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, StreamConfig::default());
        assert_eq!(config.base_url, "wss://stream.testnet.binance.vision");
        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(config.interval, "1m");
        assert_eq!(config.mode, StreamSetMode::Manual);
        assert_eq!(config.websocket.ping_interval, Duration::from_secs(30));
        assert_eq!(config.websocket.pong_timeout, None);
        assert_eq!(config.websocket.reconnect_base_delay, Duration::from_millis(1000));
        assert_eq!(config.websocket.max_reconnect_attempts, 5);
        assert!(config.websocket.reconnect_jitter.abs() < f64::EPSILON);
        assert_eq!(config.metrics_port, 0);
    }

    #[test]
    fn overrides_are_applied() {
        let config = StreamConfig::from_lookup(lookup(&[
            ("MARKET_STREAM_BASE_URL", "wss://stream.binance.com:9443"),
            ("MARKET_STREAM_SYMBOL", "ethusdt"),
            ("MARKET_STREAM_INTERVAL", "15m"),
            ("MARKET_STREAM_MODE", "auto"),
            ("MARKET_STREAM_PING_INTERVAL_SECS", "10"),
            ("MARKET_STREAM_PONG_TIMEOUT_SECS", "5"),
            ("MARKET_STREAM_RECONNECT_BASE_MS", "250"),
            ("MARKET_STREAM_MAX_RECONNECT_ATTEMPTS", "8"),
            ("MARKET_STREAM_METRICS_PORT", "9090"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "wss://stream.binance.com:9443");
        assert_eq!(config.symbol, "ETHUSDT");
        assert_eq!(config.interval, "15m");
        assert_eq!(config.mode, StreamSetMode::Auto);
        assert_eq!(config.websocket.ping_interval, Duration::from_secs(10));
        assert_eq!(config.websocket.pong_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.websocket.reconnect_base_delay, Duration::from_millis(250));
        assert_eq!(config.websocket.max_reconnect_attempts, 8);
        assert_eq!(config.metrics_port, 9090);
    }

    #[test]
    fn zero_pong_timeout_disables_check() {
        let config =
            StreamConfig::from_lookup(lookup(&[("MARKET_STREAM_PONG_TIMEOUT_SECS", "0")])).unwrap();
        assert_eq!(config.websocket.pong_timeout, None);
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = StreamConfig::from_lookup(lookup(&[("MARKET_STREAM_METRICS_PORT", "http")]))
            .unwrap_err();

        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "MARKET_STREAM_METRICS_PORT".to_string(),
                value: "http".to_string(),
            }
        );
    }

    #[test]
    fn empty_value_is_rejected() {
        let err = StreamConfig::from_lookup(lookup(&[("MARKET_STREAM_SYMBOL", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::EmptyValue("MARKET_STREAM_SYMBOL".to_string()));
    }

    #[test]
    fn non_websocket_url_is_rejected() {
        let err = StreamConfig::from_lookup(lookup(&[("MARKET_STREAM_BASE_URL", "https://x")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl(_)));
    }
}
