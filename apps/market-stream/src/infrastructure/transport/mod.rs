//! Transport Adapters
//!
//! Implementations of the [`Connector`](crate::application::ports::Connector)
//! port:
//!
//! - `TungsteniteConnector`: TLS WebSocket client for the exchange
//! - `InMemoryConnector`: channel-backed peer for tests and local runs

mod memory;
mod tungstenite;

pub use memory::{ConnectAttempt, InMemoryConnector, InMemoryPeer};
pub use tungstenite::TungsteniteConnector;
