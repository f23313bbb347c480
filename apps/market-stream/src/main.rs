//! Market Stream Binary
//!
//! Follows one symbol's kline and trade streams through the shared stream
//! manager and logs every update, the way a dashboard's live price panel
//! would consume them.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_STREAM_BASE_URL`: Stream endpoint (default: wss://stream.testnet.binance.vision)
//! - `MARKET_STREAM_SYMBOL`: Symbol to follow (default: BTCUSDT)
//! - `MARKET_STREAM_INTERVAL`: Kline interval (default: 1m)
//! - `MARKET_STREAM_MODE`: manual | auto (default: manual)
//! - `MARKET_STREAM_PING_INTERVAL_SECS`: Keepalive interval (default: 30)
//! - `MARKET_STREAM_PONG_TIMEOUT_SECS`: Pong timeout, 0 disables (default: 0)
//! - `MARKET_STREAM_RECONNECT_BASE_MS`: First reconnect delay (default: 1000)
//! - `MARKET_STREAM_MAX_RECONNECT_ATTEMPTS`: Retry budget (default: 5)
//! - `MARKET_STREAM_RECONNECT_JITTER`: Delay randomization, 0.0 to 1.0 (default: 0)
//! - `MARKET_STREAM_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: market_stream=info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use market_stream::infrastructure::telemetry;
use market_stream::{
    CandleApply, CandleSeries, LiveMarketFeed, StreamConfig, StreamManagerSlot, init_metrics,
};
use parking_lot::Mutex;
use tokio::signal;

/// Candles kept in memory for the followed symbol.
const SERIES_CAPACITY: usize = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market stream");

    let config = StreamConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        init_metrics(addr).context("failed to start metrics exporter")?;
    }

    let slot = StreamManagerSlot::new(config.clone());
    let series = Arc::new(Mutex::new(CandleSeries::with_capacity(SERIES_CAPACITY)));

    let candles = Arc::clone(&series);
    let feed = LiveMarketFeed::attach(
        slot.instance(),
        &config.symbol,
        &config.interval,
        move |update| {
            let outcome = candles.lock().apply(update.candle);
            if outcome == CandleApply::Stale {
                return;
            }
            tracing::info!(
                symbol = %update.symbol,
                interval = %update.interval,
                time = update.candle.time,
                open = update.candle.open,
                high = update.candle.high,
                low = update.candle.low,
                close = update.candle.close,
                closed = update.is_closed,
                "Kline"
            );
        },
        |trade| {
            tracing::info!(
                symbol = %trade.symbol,
                price = trade.price,
                quantity = trade.quantity,
                buyer_maker = trade.is_buyer_maker,
                "Trade"
            );
        },
    )?;

    let mut states = feed.connection_state();
    let status_watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::info!(state = %state, "Connection status");
        }
    });

    await_shutdown().await?;

    drop(feed);
    slot.destroy();
    status_watcher.abort();

    tracing::info!(candles = series.lock().len(), "Market stream stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        base_url = %config.base_url,
        symbol = %config.symbol,
        interval = %config.interval,
        mode = config.mode.as_str(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        ping_interval_secs = config.websocket.ping_interval.as_secs(),
        pong_timeout_secs = config.websocket.pong_timeout.map(|t| t.as_secs()),
        reconnect_base_ms = u64::try_from(config.websocket.reconnect_base_delay.as_millis())
            .unwrap_or(u64::MAX),
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        reconnect_jitter = config.websocket.reconnect_jitter,
        "WebSocket settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = async move {
        terminate.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    Ok(())
}
