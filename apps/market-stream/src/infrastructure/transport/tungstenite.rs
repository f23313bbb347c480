//! WebSocket connector backed by `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};

use crate::application::ports::{Connector, Socket, TransportError};

/// Opens real WebSocket sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Socket, TransportError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        Ok(Socket {
            sink: Box::pin(write.sink_map_err(TransportError::from)),
            stream: Box::pin(read.map(|frame| frame.map_err(TransportError::from))),
        })
    }
}
