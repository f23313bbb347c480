//! Connector Port (Driven Port)
//!
//! Interface for opening a WebSocket session. The connection controller
//! only sees a frame sink and a frame stream, so it runs the same against
//! the exchange and against an in-memory peer.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use tokio_tungstenite::tungstenite::{self, Message};

/// Outbound half of a session.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = TransportError> + Send>>;

/// Inbound half of a session.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, TransportError>> + Send>>;

/// An open WebSocket session, split into its two halves.
pub struct Socket {
    /// Frames sent to the server.
    pub sink: FrameSink,
    /// Frames received from the server.
    pub stream: FrameStream,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

/// Transport error.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server refused or failed the opening handshake.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    /// Protocol or I/O error on an open socket.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A frame could not be sent.
    #[error("Failed to send frame: {0}")]
    Send(String),

    /// A keepalive ping went unanswered.
    #[error("No pong received within {timeout_ms}ms")]
    PongTimeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The socket is already closed.
    #[error("Connection closed")]
    Closed,
}

/// Port for opening WebSocket sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a session to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake does not complete.
    async fn connect(&self, url: &str) -> Result<Socket, TransportError>;
}
