//! HTTP/WebSocket server for the parley conversation orchestrator
//!
//! Exposes conversation lifecycle over a small JSON API and bridges live
//! audio and transcript events over a per-conversation WebSocket.

pub mod http;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use state::{AppState, Conversation};
pub use websocket::{ClientMessage, ServerMessage};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return its render handle
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}
