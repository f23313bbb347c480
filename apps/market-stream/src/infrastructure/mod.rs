//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the exchange stream client, the transport adapters
//! implementing the application ports, and the ambient concerns.

/// Exchange stream codec, connection controller, backoff and keepalive.
pub mod exchange;

/// WebSocket connectors (tungstenite and in-memory).
pub mod transport;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
