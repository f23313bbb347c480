//! Prometheus Metrics Module
//!
//! Exposes stream manager metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: frames received, parse failures, events dispatched
//! - **Connection**: state gauge, pings sent
//! - **Reconnects**: scheduled attempts, exhausted retry budgets
//!
//! # Integration
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed. The binary installs the Prometheus exporter with
//! its own HTTP listener when a metrics port is configured.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::streaming::{ChannelKind, ConnectionState};

static EXPORTER_INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus exporter, serving `/metrics` on `addr`.
///
/// Later calls are no-ops.
///
/// # Errors
///
/// Returns an error if the recorder or the HTTP listener cannot be set up.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    if EXPORTER_INSTALLED.get().is_some() {
        return Ok(());
    }

    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    let _ = EXPORTER_INSTALLED.set(addr);

    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_stream_frames_received_total",
        "Text frames received from the exchange"
    );
    describe_counter!(
        "market_stream_parse_failures_total",
        "Frames dropped because they could not be decoded"
    );
    describe_counter!(
        "market_stream_events_dispatched_total",
        "Decoded events delivered to a handler"
    );
    describe_counter!("market_stream_pings_sent_total", "Keepalive pings sent");
    describe_counter!(
        "market_stream_reconnects_total",
        "Reconnection attempts scheduled after a close"
    );
    describe_counter!(
        "market_stream_reconnects_exhausted_total",
        "Sessions that gave up after spending the retry budget"
    );
    describe_gauge!(
        "market_stream_connection_state",
        "0 = disconnected, 1 = connecting, 2 = connected, 3 = error"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a text frame received from the exchange.
pub fn record_frame_received() {
    counter!("market_stream_frames_received_total").increment(1);
}

/// Record a frame that failed to decode.
pub fn record_parse_failure(kind: &'static str) {
    counter!("market_stream_parse_failures_total", "kind" => kind).increment(1);
}

/// Record an event delivered to a handler.
pub fn record_event_dispatched(channel: ChannelKind) {
    counter!("market_stream_events_dispatched_total", "channel" => channel.as_str()).increment(1);
}

/// Record a keepalive ping.
pub fn record_ping_sent() {
    counter!("market_stream_pings_sent_total").increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("market_stream_reconnects_total").increment(1);
}

/// Record a session that ran out of reconnection attempts.
pub fn record_reconnects_exhausted() {
    counter!("market_stream_reconnects_exhausted_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("market_stream_connection_state").set(state.gauge_value());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_parse_failure("json");
        record_event_dispatched(ChannelKind::Trade);
        set_connection_state(ConnectionState::Connected);
    }

    #[test]
    fn gauge_values_are_distinct() {
        let values = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Error,
        ]
        .map(ConnectionState::gauge_value);

        assert_eq!(values, [0.0, 1.0, 2.0, 3.0]);
    }
}
