//! Scripted transport for orchestrator tests
//!
//! Each connect consumes the next scripted session: either a connect
//! failure or a canned sequence of inbound frames delivered in order.
//! Everything the orchestrator sends is recorded for assertions.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::stream::{ModelStream, ModelTransport, TransportError};

/// One scripted connection
#[derive(Debug, Clone, Default)]
pub struct ScriptedSession {
    /// Fail the connect attempt instead of producing a stream
    pub fail_connect: bool,
    /// Frames delivered to the orchestrator, in order
    pub inbound: Vec<String>,
    /// After the script is exhausted: stay open (recv pends) rather than
    /// reporting remote close
    pub hold_open: bool,
}

impl ScriptedSession {
    pub fn new(inbound: Vec<String>) -> Self {
        Self {
            fail_connect: false,
            inbound,
            hold_open: true,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    /// Remote closes the stream once the script is exhausted
    pub fn then_close(mut self) -> Self {
        self.hold_open = false;
        self
    }
}

pub struct ScriptedTransport {
    sessions: Mutex<VecDeque<ScriptedSession>>,
    sent: Arc<Mutex<Vec<String>>>,
    connects: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            sent: Arc::new(Mutex::new(Vec::new())),
            connects: Mutex::new(Vec::new()),
        }
    }

    /// Everything sent over every stream, in send order
    pub fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Session ids passed to connect, in order
    pub fn connect_log(&self) -> Vec<String> {
        self.connects.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn connect(&self, session_id: &str) -> Result<Box<dyn ModelStream>, TransportError> {
        self.connects.lock().push(session_id.to_string());

        let session = self
            .sessions
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::ConnectFailed("script exhausted".to_string()))?;

        if session.fail_connect {
            return Err(TransportError::ConnectFailed("scripted failure".to_string()));
        }

        Ok(Box::new(ScriptedStream {
            inbound: session.inbound.into(),
            hold_open: session.hold_open,
            closed: false,
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct ScriptedStream {
    inbound: VecDeque<String>,
    hold_open: bool,
    closed: bool,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ModelStream for ScriptedStream {
    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        // Let already-spawned work interleave between scripted frames
        tokio::task::yield_now().await;
        match self.inbound.pop_front() {
            Some(frame) => Some(frame),
            None if self.hold_open => futures::future::pending().await,
            None => None,
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_delivery_and_recording() {
        let transport = ScriptedTransport::new(vec![ScriptedSession::new(vec![
            "one".to_string(),
            "two".to_string(),
        ])
        .then_close()]);

        let mut stream = transport.connect("sess-1").await.unwrap();
        stream.send("out".to_string()).await.unwrap();

        assert_eq!(stream.recv().await.as_deref(), Some("one"));
        assert_eq!(stream.recv().await.as_deref(), Some("two"));
        assert!(stream.recv().await.is_none());

        assert_eq!(transport.sent_messages(), vec!["out".to_string()]);
        assert_eq!(transport.connect_log(), vec!["sess-1".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_connect_failure() {
        let transport = ScriptedTransport::new(vec![
            ScriptedSession::failing(),
            ScriptedSession::new(vec![]),
        ]);

        assert!(transport.connect("sess-1").await.is_err());
        assert!(transport.connect("sess-1").await.is_ok());
        assert_eq!(transport.connect_count(), 2);
    }
}
