//! WebSocket transport to the remote speech service

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::stream::{ModelStream, ModelTransport, TransportError};

/// Connects each session to the configured ws:// or wss:// endpoint
pub struct WsTransport {
    endpoint: String,
}

impl WsTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ModelTransport for WsTransport {
    async fn connect(&self, session_id: &str) -> Result<Box<dyn ModelStream>, TransportError> {
        let url = format!("{}?session_id={}", self.endpoint, session_id);
        let (ws, _response) = connect_async(&url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        tracing::debug!(session_id, endpoint = %self.endpoint, "WebSocket stream connected");
        Ok(Box::new(WsStream { ws }))
    }
}

struct WsStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ModelStream for WsStream {
    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        self.ws
            .send(Message::Text(message))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<String> {
        while let Some(message) = self.ws.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(text),
                // Pings are answered by the library on the next flush
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket read error");
                    return None;
                },
            }
        }
        None
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
