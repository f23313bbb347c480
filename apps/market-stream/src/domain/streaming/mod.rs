//! Market Data Streaming Types
//!
//! Core domain types for the exchange stream: canonical stream keys,
//! candlesticks, trade ticks and the connection state broadcast to
//! observers. These types are codec-agnostic; the wire format lives in
//! `infrastructure::exchange`.

mod key;
mod market;
mod state;

pub use key::{
    COMBINED_STREAM_SEPARATOR, ChannelKind, StreamKey, StreamKeyError, build_connection_url,
    kline_stream_key, trade_stream_key,
};
pub use market::{CandleApply, CandleSeries, Candlestick, KlineUpdate, MarketEvent, TradeTick};
pub use state::ConnectionState;
