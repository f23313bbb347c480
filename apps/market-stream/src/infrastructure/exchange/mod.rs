//! Exchange Stream Adapter
//!
//! Client for the exchange's public market data streams:
//!
//! - **codec / messages**: JSON wire types and frame decoding
//! - **connection**: the single-socket session controller
//! - **reconnect / heartbeat**: backoff policy and keepalive timer

pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use codec::{CodecError, parse_inbound_frame};
pub use connection::{ConnectionConfig, ConnectionController};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use reconnect::{BASE_RECONNECT_DELAY, MAX_RECONNECT_ATTEMPTS, ReconnectConfig, ReconnectPolicy};
