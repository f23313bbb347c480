//! Decoded market data.

use chrono::{DateTime, Utc};

use super::key::{ChannelKind, StreamKey};

/// One OHLC(V) bar, timestamped at its period start in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candlestick {
    /// Period start, seconds since the Unix epoch.
    pub time: i64,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price (latest price while the period is open).
    pub close: f64,
    /// Base asset volume, when the source reports it.
    pub volume: Option<f64>,
}

impl Candlestick {
    /// Period start as a UTC timestamp.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }
}

/// A kline stream update: the current candle for one symbol and interval.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineUpdate {
    /// Upper-case exchange symbol, as reported by the stream.
    pub symbol: String,
    /// Interval token (`1m`, `1h`, ...).
    pub interval: String,
    /// The candle.
    pub candle: Candlestick,
    /// Whether the period has closed.
    pub is_closed: bool,
}

impl KlineUpdate {
    /// Key of the stream this update arrived on.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::kline(&self.symbol, &self.interval)
    }
}

/// A single executed trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeTick {
    /// Upper-case exchange symbol.
    pub symbol: String,
    /// Execution price.
    pub price: f64,
    /// Executed quantity.
    pub quantity: f64,
    /// Trade time, milliseconds since the Unix epoch.
    pub event_time_ms: i64,
    /// Whether the buyer was the resting (maker) side.
    pub is_buyer_maker: bool,
}

impl TradeTick {
    /// Key of the stream this trade arrived on.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::trade(&self.symbol)
    }

    /// Trade time as a UTC timestamp.
    #[must_use]
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.event_time_ms)
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    /// Candlestick update.
    Kline(KlineUpdate),
    /// Trade.
    Trade(TradeTick),
}

impl MarketEvent {
    /// Key used to route this event to its handler.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        match self {
            Self::Kline(update) => update.stream_key(),
            Self::Trade(trade) => trade.stream_key(),
        }
    }

    /// Channel of this event.
    #[must_use]
    pub const fn channel(&self) -> ChannelKind {
        match self {
            Self::Kline(_) => ChannelKind::Kline,
            Self::Trade(_) => ChannelKind::Trade,
        }
    }
}

// ============================================================================
// Candle Series
// ============================================================================

/// Outcome of applying a candle to a [`CandleSeries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleApply {
    /// A new period started and was appended.
    Appended,
    /// The in-progress period was replaced by the newer candle.
    Replaced,
    /// The candle is older than the last point and was ignored.
    Stale,
}

/// Time-ordered candles for one chart.
///
/// Live kline updates repeat the same `time` while a period is open; those
/// overwrite the last point instead of growing the series.
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    candles: Vec<Candlestick>,
    capacity: Option<usize>,
}

impl CandleSeries {
    /// Create an unbounded series.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a series that keeps at most `capacity` candles, dropping the
    /// oldest first.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            candles: Vec::with_capacity(capacity),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Merge `candle` into the series.
    pub fn apply(&mut self, candle: Candlestick) -> CandleApply {
        let outcome = match self.candles.last_mut() {
            Some(last) if candle.time == last.time => {
                *last = candle;
                CandleApply::Replaced
            }
            Some(last) if candle.time < last.time => CandleApply::Stale,
            _ => {
                self.candles.push(candle);
                CandleApply::Appended
            }
        };

        if let Some(capacity) = self.capacity
            && self.candles.len() > capacity
        {
            let excess = self.candles.len() - capacity;
            self.candles.drain(..excess);
        }

        outcome
    }

    /// The most recent candle.
    #[must_use]
    pub fn last(&self) -> Option<&Candlestick> {
        self.candles.last()
    }

    /// All candles, oldest first.
    #[must_use]
    pub fn candles(&self) -> &[Candlestick] {
        &self.candles
    }

    /// Number of candles held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// Whether the series holds no candles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Drop every candle, e.g. when the chart switches symbol.
    pub fn clear(&mut self) {
        self.candles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time: i64, close: f64) -> Candlestick {
        Candlestick {
            time,
            open: 1.0,
            high: close.max(1.0),
            low: close.min(1.0),
            close,
            volume: None,
        }
    }

    #[test]
    fn kline_update_routes_by_lower_case_key() {
        let update = KlineUpdate {
            symbol: "BTCUSDT".to_string(),
            interval: "1m".to_string(),
            candle: candle(60, 2.0),
            is_closed: false,
        };

        let event = MarketEvent::Kline(update);
        assert_eq!(event.stream_key().as_str(), "btcusdt@kline_1m");
        assert_eq!(event.channel(), ChannelKind::Kline);
    }

    #[test]
    fn trade_tick_time_is_milliseconds() {
        let trade = TradeTick {
            symbol: "ETHUSDT".to_string(),
            price: 3000.5,
            quantity: 0.25,
            event_time_ms: 1_700_000_000_123,
            is_buyer_maker: true,
        };

        let at = trade.event_time().unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);
        assert_eq!(at.timestamp_subsec_millis(), 123);
        assert_eq!(trade.stream_key().as_str(), "ethusdt@trade");
    }

    #[test]
    fn candle_timestamp_is_seconds() {
        let at = candle(1_700_000_040, 1.0).timestamp().unwrap();
        assert_eq!(at.timestamp(), 1_700_000_040);
    }

    #[test]
    fn series_replaces_same_period() {
        let mut series = CandleSeries::new();
        assert_eq!(series.apply(candle(60, 1.5)), CandleApply::Appended);
        assert_eq!(series.apply(candle(60, 1.8)), CandleApply::Replaced);

        assert_eq!(series.len(), 1);
        assert!((series.last().unwrap().close - 1.8).abs() < f64::EPSILON);
    }

    #[test]
    fn series_appends_new_period_and_ignores_old() {
        let mut series = CandleSeries::new();
        series.apply(candle(60, 1.0));
        assert_eq!(series.apply(candle(120, 2.0)), CandleApply::Appended);
        assert_eq!(series.apply(candle(60, 9.0)), CandleApply::Stale);

        let times: Vec<i64> = series.candles().iter().map(|c| c.time).collect();
        assert_eq!(times, vec![60, 120]);
    }

    #[test]
    fn bounded_series_drops_oldest() {
        let mut series = CandleSeries::with_capacity(2);
        for time in [60, 120, 180] {
            series.apply(candle(time, 1.0));
        }

        let times: Vec<i64> = series.candles().iter().map(|c| c.time).collect();
        assert_eq!(times, vec![120, 180]);

        series.clear();
        assert!(series.is_empty());
    }
}
