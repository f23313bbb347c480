#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! Market Stream - Exchange Stream Multiplexer
//!
//! A client that maintains a single WebSocket connection to the exchange's
//! public market data streams and multiplexes kline and trade updates to
//! many in-process consumers.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Stream keys, market data types, subscription registry
//!   - `streaming`: Stream key codec, candles, trades, connection state
//!   - `subscription`: Key-to-handler registry and state observers
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The `Connector` transport interface
//!   - `services`: Stream manager facade, shared slot, live feed
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchange`: Frame codec, connection controller, backoff, keepalive
//!   - `transport`: tungstenite and in-memory connectors
//!   - `config`: Environment configuration
//!   - `metrics` / `telemetry`: Prometheus metrics and tracing
//!
//! # Data Flow
//!
//! ```text
//!                       ┌──────────────────────┐
//! subscribe_kline ────► │ SubscriptionRegistry │ ◄──── dispatch(event)
//! subscribe_trade ────► │   key → handler      │              ▲
//!                       └──────────────────────┘              │
//!                                                      parse_inbound_frame
//! connect(keys) ──► ConnectionController ──► Connector ──► exchange WS
//!                      │  backoff · keepalive
//!                      └──► observers (Connecting/Connected/Disconnected/Error)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    CandleApply, CandleSeries, Candlestick, ChannelKind, ConnectionState, KlineUpdate,
    MarketEvent, StreamKey, StreamKeyError, TradeTick, build_connection_url, kline_stream_key,
    trade_stream_key,
};
pub use domain::subscription::{ObserverHandle, SubscriptionId, SubscriptionRegistry};

// Application
pub use application::ports::{Connector, Socket, TransportError};
pub use application::services::{LiveMarketFeed, StreamManager, StreamManagerSlot};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, StreamConfig, StreamSetMode, UnknownMode, WebSocketSettings,
};

// Exchange client
pub use infrastructure::exchange::{
    BASE_RECONNECT_DELAY, CodecError, ConnectionConfig, ConnectionController,
    MAX_RECONNECT_ATTEMPTS, parse_inbound_frame,
};

// Transports
pub use infrastructure::transport::{InMemoryConnector, InMemoryPeer, TungsteniteConnector};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
