//! Exchange WebSocket Message Types
//!
//! Wire format types for the exchange's public market streams. Prices and
//! quantities arrive as decimal strings; times are epoch milliseconds.
//!
//! # Message Types
//!
//! - `kline`: candlestick for one symbol and interval, repeated while the
//!   period is open and once more with `x = true` when it closes
//! - `trade`: one executed trade
//!
//! Frames from a combined-stream connection wrap the payload:
//!
//! ```json
//! {"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT",...}}
//! ```

use serde::{Deserialize, Serialize};

/// Discriminator value of kline payloads.
pub const KLINE_EVENT: &str = "kline";

/// Discriminator value of trade payloads.
pub const TRADE_EVENT: &str = "trade";

/// Combined-stream wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedEnvelope {
    /// Stream the payload arrived on.
    pub stream: String,
    /// The payload.
    pub data: serde_json::Value,
}

/// Kline (candlestick) event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlineMessage {
    /// Event time (ms).
    #[serde(rename = "E", default)]
    pub event_time: Option<i64>,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Candle body.
    #[serde(rename = "k")]
    pub kline: KlineBody,
}

/// Candle body of a kline event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlineBody {
    /// Period start (ms).
    #[serde(rename = "t")]
    pub open_time: i64,
    /// Period end (ms).
    #[serde(rename = "T", default)]
    pub close_time: Option<i64>,
    /// Interval token.
    #[serde(rename = "i")]
    pub interval: String,
    /// Open price.
    #[serde(rename = "o")]
    pub open: String,
    /// High price.
    #[serde(rename = "h")]
    pub high: String,
    /// Low price.
    #[serde(rename = "l")]
    pub low: String,
    /// Close price.
    #[serde(rename = "c")]
    pub close: String,
    /// Base asset volume.
    #[serde(rename = "v", default)]
    pub volume: Option<String>,
    /// Whether the period has closed.
    #[serde(rename = "x", default)]
    pub is_closed: bool,
}

/// Trade event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeMessage {
    /// Event time (ms).
    #[serde(rename = "E", default)]
    pub event_time: Option<i64>,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Trade ID.
    #[serde(rename = "t", default)]
    pub trade_id: Option<u64>,
    /// Price.
    #[serde(rename = "p")]
    pub price: String,
    /// Quantity.
    #[serde(rename = "q")]
    pub quantity: String,
    /// Trade time (ms).
    #[serde(rename = "T")]
    pub trade_time: i64,
    /// Whether the buyer is the market maker.
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_kline() {
        let json = r#"{
            "e": "kline", "E": 1700000001000, "s": "BTCUSDT",
            "k": {
                "t": 1700000000000, "T": 1700000059999, "s": "BTCUSDT", "i": "1m",
                "f": 100, "L": 200, "o": "50000.00", "c": "50010.50",
                "h": "50020.00", "l": "49990.00", "v": "12.5", "n": 100,
                "x": false, "q": "625000.0", "V": "6.0", "Q": "300000.0", "B": "0"
            }
        }"#;

        let msg: KlineMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.symbol, "BTCUSDT");
        assert_eq!(msg.kline.open_time, 1_700_000_000_000);
        assert_eq!(msg.kline.interval, "1m");
        assert_eq!(msg.kline.close, "50010.50");
        assert_eq!(msg.kline.volume.as_deref(), Some("12.5"));
        assert!(!msg.kline.is_closed);
    }

    #[test]
    fn deserialize_trade_distinguishes_id_and_time() {
        let json = r#"{"e":"trade","E":123456789,"s":"BNBBTC","t":12345,"p":"0.001","q":"100","T":123456785,"m":true,"M":true}"#;

        let msg: TradeMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.trade_id, Some(12345));
        assert_eq!(msg.trade_time, 123_456_785);
        assert_eq!(msg.event_time, Some(123_456_789));
        assert!(msg.is_buyer_maker);
    }

    #[test]
    fn deserialize_envelope() {
        let json = r#"{"stream":"btcusdt@trade","data":{"e":"trade"}}"#;
        let envelope: CombinedEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.stream, "btcusdt@trade");
        assert_eq!(envelope.data["e"], "trade");
    }
}
