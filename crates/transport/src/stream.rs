//! Transport traits and errors

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The stream is closed; no further frames will move in either direction
    #[error("stream closed")]
    Closed,
}

/// One established bidirectional message stream with the remote service
///
/// Frames are opaque text; encoding and decoding happen elsewhere. `recv`
/// returning `None` means the remote side closed the stream.
#[async_trait]
pub trait ModelStream: Send {
    async fn send(&mut self, message: String) -> Result<(), TransportError>;

    async fn recv(&mut self) -> Option<String>;

    /// Close the stream; idempotent
    async fn close(&mut self);
}

/// Connection factory for [`ModelStream`]s
///
/// One connect per session; reconnects and agent switches call it again.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn connect(&self, session_id: &str) -> Result<Box<dyn ModelStream>, TransportError>;
}
