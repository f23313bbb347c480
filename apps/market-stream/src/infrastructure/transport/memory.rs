//! In-memory connector.
//!
//! Every successful `connect` hands a [`InMemoryPeer`] to whoever awaits
//! [`InMemoryConnector::accept`]. The peer plays the server: it pushes
//! frames to the client and reads what the client sends.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc as frames;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::{Connector, Socket, TransportError};

/// A recorded connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAttempt {
    /// Requested URL.
    pub url: String,
    /// When the attempt was made.
    pub at: Instant,
}

/// Connector whose sessions are in-process channels.
#[derive(Debug)]
pub struct InMemoryConnector {
    refusing: AtomicBool,
    attempts: Mutex<Vec<ConnectAttempt>>,
    peer_tx: mpsc::UnboundedSender<InMemoryPeer>,
    peer_rx: AsyncMutex<mpsc::UnboundedReceiver<InMemoryPeer>>,
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConnector {
    /// Create a connector that accepts every attempt.
    #[must_use]
    pub fn new() -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        Self {
            refusing: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
            peer_tx,
            peer_rx: AsyncMutex::new(peer_rx),
        }
    }

    /// Create a connector that fails every handshake.
    #[must_use]
    pub fn refusing() -> Self {
        let connector = Self::new();
        connector.set_refusing(true);
        connector
    }

    /// Start or stop failing handshakes.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Every attempt so far, oldest first.
    #[must_use]
    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts.lock().clone()
    }

    /// Number of attempts so far.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Wait for the next accepted session.
    pub async fn accept(&self) -> Option<InMemoryPeer> {
        self.peer_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, url: &str) -> Result<Socket, TransportError> {
        self.attempts.lock().push(ConnectAttempt {
            url: url.to_string(),
            at: Instant::now(),
        });

        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Handshake("connection refused".to_string()));
        }

        let (to_client, client_rx) = frames::unbounded::<Result<Message, TransportError>>();
        let (client_tx, from_client) = frames::unbounded::<Message>();

        let peer = InMemoryPeer {
            url: url.to_string(),
            to_client,
            from_client,
        };
        self.peer_tx
            .send(peer)
            .map_err(|_| TransportError::Handshake("no listener".to_string()))?;

        Ok(Socket {
            sink: Box::pin(client_tx.sink_map_err(|e| TransportError::Send(e.to_string()))),
            stream: Box::pin(client_rx),
        })
    }
}

/// Server side of one in-memory session.
#[derive(Debug)]
pub struct InMemoryPeer {
    url: String,
    to_client: frames::UnboundedSender<Result<Message, TransportError>>,
    from_client: frames::UnboundedReceiver<Message>,
}

impl InMemoryPeer {
    /// URL the client connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a text frame to the client.
    ///
    /// Returns `false` if the client has gone away.
    pub fn send_text(&self, text: &str) -> bool {
        self.send(Message::text(text))
    }

    /// Push any frame to the client.
    pub fn send(&self, message: Message) -> bool {
        self.to_client.unbounded_send(Ok(message)).is_ok()
    }

    /// Fail the client's stream with `error`.
    pub fn send_error(&self, error: TransportError) -> bool {
        self.to_client.unbounded_send(Err(error)).is_ok()
    }

    /// Send a close frame and end the session.
    pub fn close(self) {
        let _ = self.to_client.unbounded_send(Ok(Message::Close(None)));
    }

    /// Next frame sent by the client; `None` once the client hung up.
    pub async fn recv(&mut self) -> Option<Message> {
        self.from_client.next().await
    }
}
