//! In-process transport
//!
//! A pair of connected streams backed by bounded channels. The service side
//! of each connection is handed out through the transport's peer receiver,
//! so an in-process model (or a test acting as one) can drive it.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::stream::{ModelStream, ModelTransport, TransportError};

/// One end of an in-process stream pair
pub struct DuplexStream {
    tx: Option<mpsc::Sender<String>>,
    rx: mpsc::Receiver<String>,
}

/// Create a connected pair of streams with the given per-direction capacity
pub fn duplex_pair(capacity: usize) -> (DuplexStream, DuplexStream) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (
        DuplexStream {
            tx: Some(a_tx),
            rx: b_rx,
        },
        DuplexStream {
            tx: Some(b_tx),
            rx: a_rx,
        },
    )
}

#[async_trait]
impl ModelStream for DuplexStream {
    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx.send(message).await.map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        // Dropping our sender lets the peer's recv() observe the close
        self.tx = None;
        self.rx.close();
    }
}

/// Service side of an accepted connection
pub struct PeerConnection {
    pub session_id: String,
    pub stream: DuplexStream,
}

/// Transport whose connections terminate in-process
pub struct InMemoryTransport {
    peers: mpsc::UnboundedSender<PeerConnection>,
    capacity: usize,
}

impl InMemoryTransport {
    /// Returns the transport and the receiver the service side accepts
    /// connections from
    pub fn new(capacity: usize) -> (Self, mpsc::UnboundedReceiver<PeerConnection>) {
        let (peers, accept) = mpsc::unbounded_channel();
        (Self { peers, capacity }, accept)
    }
}

#[async_trait]
impl ModelTransport for InMemoryTransport {
    async fn connect(&self, session_id: &str) -> Result<Box<dyn ModelStream>, TransportError> {
        let (local, remote) = duplex_pair(self.capacity);
        self.peers
            .send(PeerConnection {
                session_id: session_id.to_string(),
                stream: remote,
            })
            .map_err(|_| TransportError::ConnectFailed("no acceptor".to_string()))?;
        tracing::debug!(session_id, "In-memory stream connected");
        Ok(Box::new(local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplex_round_trip() {
        let (mut a, mut b) = duplex_pair(8);
        a.send("ping".to_string()).await.unwrap();
        assert_eq!(b.recv().await.as_deref(), Some("ping"));

        b.send("pong".to_string()).await.unwrap();
        assert_eq!(a.recv().await.as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn test_close_observed_by_peer() {
        let (mut a, mut b) = duplex_pair(8);
        a.close().await;
        assert!(b.recv().await.is_none());
        assert!(matches!(
            b.send("late".to_string()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_transport_hands_out_peer() {
        let (transport, mut accept) = InMemoryTransport::new(8);
        let mut local = transport.connect("sess-1").await.unwrap();

        let mut peer = accept.recv().await.unwrap();
        assert_eq!(peer.session_id, "sess-1");

        local.send("hello".to_string()).await.unwrap();
        assert_eq!(peer.stream.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_connect_fails_without_acceptor() {
        let (transport, accept) = InMemoryTransport::new(8);
        drop(accept);
        assert!(transport.connect("sess-1").await.is_err());
    }
}
