//! Application Ports
//!
//! Ports define the interfaces between the stream manager and the systems
//! it drives.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: opens one WebSocket session to a stream URL

mod connector_port;

pub use connector_port::{Connector, FrameSink, FrameStream, Socket, TransportError};
