//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the stream manager facade, the per-consumer live
//! feed, and the port the connection controller drives.

/// Port interfaces for external systems (WebSocket transport).
pub mod ports;

/// Stream manager and live feed services.
pub mod services;
