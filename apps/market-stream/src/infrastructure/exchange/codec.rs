//! Inbound Frame Codec
//!
//! Decodes exchange text frames into [`MarketEvent`]s.
//!
//! Frames are either a bare payload or a combined-stream envelope
//! `{"stream": ..., "data": payload}`. The payload's `e` field selects the
//! event type. Anything else is an error the caller logs and drops; a bad
//! frame never affects the connection.

use serde_json::Value;

use crate::domain::streaming::{Candlestick, KlineUpdate, MarketEvent, TradeTick};
use crate::infrastructure::exchange::messages::{
    KLINE_EVENT, KlineMessage, TRADE_EVENT, TradeMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload has no `e` discriminator.
    #[error("payload has no event type")]
    MissingEventType,

    /// The payload's `e` discriminator is not a supported event.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// A numeric string field did not parse.
    #[error("invalid number in field {field}: {value:?}")]
    InvalidNumber {
        /// Wire field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },
}

impl CodecError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::MissingEventType => "missing_event_type",
            Self::UnknownEventType(_) => "unknown_event_type",
            Self::InvalidNumber { .. } => "invalid_number",
        }
    }
}

/// Decode one inbound text frame.
///
/// # Errors
///
/// Returns an error for invalid JSON, a missing or unknown `e`
/// discriminator, or a price/quantity string that is not a finite number.
pub fn parse_inbound_frame(text: &str) -> Result<MarketEvent, CodecError> {
    let mut value: Value = serde_json::from_str(text)?;

    if let Some(data) = value.get_mut("data") {
        value = data.take();
    }

    let event_type = value
        .get("e")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingEventType)?;

    match event_type {
        KLINE_EVENT => {
            let message: KlineMessage = serde_json::from_value(value)?;
            kline_from_message(message).map(MarketEvent::Kline)
        }
        TRADE_EVENT => {
            let message: TradeMessage = serde_json::from_value(value)?;
            trade_from_message(message).map(MarketEvent::Trade)
        }
        other => Err(CodecError::UnknownEventType(other.to_string())),
    }
}

fn kline_from_message(message: KlineMessage) -> Result<KlineUpdate, CodecError> {
    let body = message.kline;

    let candle = Candlestick {
        time: body.open_time / 1000,
        open: parse_number("k.o", &body.open)?,
        high: parse_number("k.h", &body.high)?,
        low: parse_number("k.l", &body.low)?,
        close: parse_number("k.c", &body.close)?,
        volume: body
            .volume
            .as_deref()
            .map(|v| parse_number("k.v", v))
            .transpose()?,
    };

    Ok(KlineUpdate {
        symbol: message.symbol,
        interval: body.interval,
        candle,
        is_closed: body.is_closed,
    })
}

fn trade_from_message(message: TradeMessage) -> Result<TradeTick, CodecError> {
    Ok(TradeTick {
        price: parse_number("p", &message.price)?,
        quantity: parse_number("q", &message.quantity)?,
        symbol: message.symbol,
        event_time_ms: message.trade_time,
        is_buyer_maker: message.is_buyer_maker,
    })
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64, CodecError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CodecError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    const KLINE_FRAME: &str = r#"{"e":"kline","E":1700000001000,"s":"BTCUSDT","k":{"t":1700000000999,"T":1700000059999,"s":"BTCUSDT","i":"1m","o":"50000.00","c":"50010.50","h":"50020.00","l":"49990.00","v":"12.5","x":true}}"#;

    #[test]
    fn decodes_bare_kline() {
        let MarketEvent::Kline(update) = parse_inbound_frame(KLINE_FRAME).unwrap() else {
            panic!("expected kline");
        };

        assert_eq!(update.symbol, "BTCUSDT");
        assert_eq!(update.interval, "1m");
        assert!(update.is_closed);
        assert_eq!(update.candle.time, 1_700_000_000);
        assert_eq!(update.candle.open, 50_000.0);
        assert_eq!(update.candle.high, 50_020.0);
        assert_eq!(update.candle.low, 49_990.0);
        assert_eq!(update.candle.close, 50_010.5);
        assert_eq!(update.candle.volume, Some(12.5));
        assert_eq!(update.stream_key().as_str(), "btcusdt@kline_1m");
    }

    #[test]
    fn decodes_enveloped_trade() {
        let frame = r#"{"stream":"btcusdt@trade","data":{"e":"trade","E":1,"s":"BTCUSDT","t":7,"p":"50000.1","q":"0.002","T":1700000000123,"m":false}}"#;

        let MarketEvent::Trade(trade) = parse_inbound_frame(frame).unwrap() else {
            panic!("expected trade");
        };

        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.price, 50_000.1);
        assert_eq!(trade.quantity, 0.002);
        assert_eq!(trade.event_time_ms, 1_700_000_000_123);
        assert!(!trade.is_buyer_maker);
    }

    #[test]
    fn kline_without_volume_is_accepted() {
        let frame = r#"{"e":"kline","s":"ETHUSDT","k":{"t":60000,"i":"1h","o":"1","h":"2","l":"0.5","c":"1.5"}}"#;

        let MarketEvent::Kline(update) = parse_inbound_frame(frame).unwrap() else {
            panic!("expected kline");
        };
        assert_eq!(update.candle.time, 60);
        assert_eq!(update.candle.volume, None);
        assert!(!update.is_closed);
    }

    #[test_case("not json" ; "invalid json")]
    #[test_case("" ; "empty frame")]
    #[test_case(r#"{"e":"trade","s":"BTCUSDT"}"# ; "missing fields")]
    fn rejects_malformed_json(frame: &str) {
        assert!(matches!(parse_inbound_frame(frame), Err(CodecError::Json(_))));
    }

    #[test_case(r#"{"s":"BTCUSDT"}"# ; "no discriminator")]
    #[test_case(r#"{"e":42}"# ; "non string discriminator")]
    #[test_case(r#"{"result":null,"id":1}"# ; "control response")]
    #[test_case("[1,2,3]" ; "array payload")]
    fn rejects_missing_event_type(frame: &str) {
        assert!(matches!(
            parse_inbound_frame(frame),
            Err(CodecError::MissingEventType)
        ));
    }

    #[test]
    fn rejects_unknown_event_type() {
        let frame = r#"{"stream":"btcusdt@depth","data":{"e":"depthUpdate","s":"BTCUSDT"}}"#;
        let err = parse_inbound_frame(frame).unwrap_err();

        assert!(matches!(err, CodecError::UnknownEventType(ref kind) if kind == "depthUpdate"));
        assert_eq!(err.kind(), "unknown_event_type");
    }

    #[test_case("abc" ; "letters")]
    #[test_case("NaN" ; "not a number")]
    #[test_case("inf" ; "infinite")]
    fn rejects_invalid_price(price: &str) {
        let frame = format!(
            r#"{{"e":"trade","s":"BTCUSDT","p":"{price}","q":"1","T":1,"m":false}}"#
        );

        let err = parse_inbound_frame(&frame).unwrap_err();
        assert!(matches!(err, CodecError::InvalidNumber { field: "p", .. }));
    }
}
