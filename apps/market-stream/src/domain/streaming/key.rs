//! Stream Key Codec
//!
//! Maps (symbol, channel, interval) to the exchange's canonical stream
//! names and builds the connection URL for a set of streams.
//!
//! # Wire Format
//!
//! ```text
//! btcusdt@kline_1m                                   kline stream
//! btcusdt@trade                                      trade stream
//! {base}/ws/btcusdt@trade                            direct connection
//! {base}/stream?streams=btcusdt@kline_1m/btcusdt@trade   combined connection
//! ```

use std::fmt;

/// Separator between stream names in a combined-stream URL.
pub const COMBINED_STREAM_SEPARATOR: &str = "/";

const KLINE_MARKER: &str = "@kline_";
const TRADE_MARKER: &str = "@trade";

/// Logical channel carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Candlestick updates for one symbol and interval.
    Kline,
    /// Individual trades for one symbol.
    Trade,
}

impl ChannelKind {
    /// Get the channel name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kline => "kline",
            Self::Trade => "trade",
        }
    }
}

/// Canonical identifier of one logical subscription.
///
/// Always built from lower-cased symbols, so the same inputs in any case
/// produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey(String);

impl StreamKey {
    /// Key for the kline stream of `symbol` at `interval`.
    ///
    /// The interval token is passed through verbatim (`1m`, `1h`, `1d`, ...).
    #[must_use]
    pub fn kline(symbol: &str, interval: &str) -> Self {
        Self(format!("{}{KLINE_MARKER}{interval}", symbol.to_lowercase()))
    }

    /// Key for the trade stream of `symbol`.
    #[must_use]
    pub fn trade(symbol: &str) -> Self {
        Self(format!("{}{TRADE_MARKER}", symbol.to_lowercase()))
    }

    /// The key as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The lower-cased symbol part of the key.
    #[must_use]
    pub fn symbol(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(symbol, _)| symbol)
    }

    /// The channel this key belongs to.
    #[must_use]
    pub fn channel(&self) -> ChannelKind {
        if self.0.contains(KLINE_MARKER) {
            ChannelKind::Kline
        } else {
            ChannelKind::Trade
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Build the kline stream key for `symbol` at `interval`.
#[must_use]
pub fn kline_stream_key(symbol: &str, interval: &str) -> StreamKey {
    StreamKey::kline(symbol, interval)
}

/// Build the trade stream key for `symbol`.
#[must_use]
pub fn trade_stream_key(symbol: &str) -> StreamKey {
    StreamKey::trade(symbol)
}

/// Build the connection URL for an ordered set of stream keys.
///
/// A single key produces a direct-stream URL; several keys produce a
/// combined-stream URL listing every key in the given order.
///
/// # Errors
///
/// Returns [`StreamKeyError::EmptyStreamSet`] when `keys` is empty.
pub fn build_connection_url(base_url: &str, keys: &[StreamKey]) -> Result<String, StreamKeyError> {
    let base = base_url.trim_end_matches('/');

    match keys {
        [] => Err(StreamKeyError::EmptyStreamSet),
        [single] => Ok(format!("{base}/ws/{single}")),
        many => {
            let joined = many
                .iter()
                .map(StreamKey::as_str)
                .collect::<Vec<_>>()
                .join(COMBINED_STREAM_SEPARATOR);
            Ok(format!("{base}/stream?streams={joined}"))
        }
    }
}

/// Stream key errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamKeyError {
    /// No streams were requested.
    #[error("cannot connect without any streams")]
    EmptyStreamSet,
}
