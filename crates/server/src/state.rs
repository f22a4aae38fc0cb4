//! Shared application state

use std::sync::Arc;

use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusHandle;

use parley_audio::AudioIoChannel;
use parley_config::{AgentRegistry, Settings};
use parley_orchestrator::SessionOrchestrator;
use parley_tools::{ToolDispatcher, ToolRegistry};
use parley_transport::ModelTransport;

/// One live conversation: its orchestrator and the audio queues the
/// WebSocket handler bridges to the client
pub struct Conversation {
    pub orchestrator: SessionOrchestrator,
    pub audio: Arc<AudioIoChannel>,
}

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub agents: Arc<AgentRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub transport: Arc<dyn ModelTransport>,
    pub conversations: Arc<DashMap<String, Conversation>>,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn new(
        settings: Settings,
        agents: Arc<AgentRegistry>,
        tools: Arc<ToolRegistry>,
        transport: Arc<dyn ModelTransport>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            settings,
            agents,
            tools,
            transport,
            conversations: Arc::new(DashMap::new()),
            metrics,
        }
    }

    pub fn at_capacity(&self) -> bool {
        self.conversations.len() >= self.settings.server.max_sessions
    }

    /// Create a conversation with fresh audio queues and a per-conversation
    /// tool dispatcher, register it, and return its handle
    pub fn create_conversation(&self) -> (String, SessionOrchestrator) {
        let id = uuid::Uuid::new_v4().to_string();
        let audio = Arc::new(AudioIoChannel::new(
            self.settings.audio.capture_queue_depth,
            self.settings.audio.playback_queue_depth,
        ));
        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::clone(&self.tools),
            self.settings.tools.max_concurrent,
        ));
        let orchestrator = SessionOrchestrator::new(
            Arc::clone(&self.agents),
            Arc::clone(&self.transport),
            dispatcher,
            Arc::clone(&audio),
            self.settings.orchestrator.clone(),
        );

        self.conversations.insert(
            id.clone(),
            Conversation {
                orchestrator: orchestrator.clone(),
                audio,
            },
        );
        metrics::gauge!("parley_conversations").set(self.conversations.len() as f64);

        (id, orchestrator)
    }

    pub fn remove_conversation(&self, id: &str) -> Option<Conversation> {
        let removed = self.conversations.remove(id).map(|(_, c)| c);
        if removed.is_some() {
            metrics::gauge!("parley_conversations").set(self.conversations.len() as f64);
        }
        removed
    }
}
