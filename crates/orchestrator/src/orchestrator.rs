//! The session orchestrator
//!
//! One pump task per stream (send + receive against the transport), one
//! router task per conversation (event routing, turn tracking, switching),
//! one resolution task draining the tool dispatcher. The router never
//! blocks on tool execution and the pump never blocks on routing.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use parley_audio::AudioIoChannel;
use parley_config::{AgentRegistry, OrchestratorSettings};
use parley_core::{
    AgentDefinition, AudioFrame, ConversationHistory, ConversationTurn, InboundEvent,
    OrchestratorError, OutboundEvent, Result, SwitchRequest, ToolOutcome, ToolResolution,
    TurnRole, TurnState,
};
use parley_tools::{ToolDispatcher, SWITCH_AGENT_TOOL};
use parley_transport::{ModelStream, ModelTransport};

use crate::events::OrchestratorEvent;
use crate::session::{Session, SessionState, SwitchPhase};

/// Frames handed from a stream pump to the router, tagged with the pump's
/// generation so frames from a replaced stream are ignored
enum PumpFrame {
    Inbound(u64, String),
    Closed(u64),
}

struct Shared {
    session: Option<Session>,
    history: ConversationHistory,
    pending_switch: Option<SwitchRequest>,
    switch_phase: SwitchPhase,
    pending_invocations: HashSet<String>,
    decode_errors: VecDeque<Instant>,
    dropped_frames: u64,
    /// Outbound audio suppressed (switch draining, stop)
    muted: bool,
    /// Sender into the current pump; replacing it retires the old stream
    outbound: Option<mpsc::Sender<String>>,
    inbound_tx: Option<mpsc::Sender<PumpFrame>>,
    results_tx: Option<mpsc::Sender<ToolResolution>>,
    shutdown: Option<watch::Sender<bool>>,
    generation: u64,
    reconnected: bool,
    stopping: bool,
}

impl Shared {
    fn new() -> Self {
        Self {
            session: None,
            history: ConversationHistory::new(),
            pending_switch: None,
            switch_phase: SwitchPhase::Idle,
            pending_invocations: HashSet::new(),
            decode_errors: VecDeque::new(),
            dropped_frames: 0,
            muted: false,
            outbound: None,
            inbound_tx: None,
            results_tx: None,
            shutdown: None,
            generation: 0,
            reconnected: false,
            stopping: false,
        }
    }

    fn agent_turn_open(&self) -> bool {
        self.history
            .turns()
            .iter()
            .any(|t| t.role == TurnRole::Agent && t.is_open())
    }
}

struct Inner {
    registry: Arc<AgentRegistry>,
    transport: Arc<dyn ModelTransport>,
    dispatcher: Arc<ToolDispatcher>,
    audio: Arc<AudioIoChannel>,
    settings: OrchestratorSettings,
    events: broadcast::Sender<OrchestratorEvent>,
    shared: Mutex<Shared>,
}

/// Drives one spoken conversation end to end
///
/// Cheap to clone; all clones share the same conversation.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        transport: Arc<dyn ModelTransport>,
        dispatcher: Arc<ToolDispatcher>,
        audio: Arc<AudioIoChannel>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                registry,
                transport,
                dispatcher,
                audio,
                settings,
                events,
                shared: Mutex::new(Shared::new()),
            }),
        }
    }

    /// Subscribe to the UI event sink
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    /// Start a session with the named agent
    pub async fn start(&self, agent_id: &str) -> Result<()> {
        let agent = self
            .inner
            .registry
            .get(agent_id)
            .ok_or_else(|| OrchestratorError::AgentNotFound(agent_id.to_string()))?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (results_tx, results_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        {
            let mut shared = self.inner.shared.lock();
            if shared.session.is_some() {
                return Err(OrchestratorError::AlreadyActive);
            }
            shared.session = Some(Session::new(session_id.clone(), Arc::clone(&agent)));
            shared.inbound_tx = Some(inbound_tx);
            shared.results_tx = Some(results_tx);
            shared.shutdown = Some(shutdown_tx);
            shared.stopping = false;
            shared.reconnected = false;
        }

        if let Err(e) = self.open_stream(&agent, &session_id, None).await {
            let mut shared = self.inner.shared.lock();
            shared.session = None;
            shared.inbound_tx = None;
            shared.results_tx = None;
            shared.shutdown = None;
            return Err(e);
        }

        if let Some(session) = self.inner.shared.lock().session.as_mut() {
            session.state = SessionState::Active;
        }

        let router = self.clone();
        tokio::spawn(router.run_router(inbound_rx, shutdown_rx));
        let resolver = self.clone();
        tokio::spawn(resolver.run_resolutions(results_rx));

        tracing::info!(session_id = %session_id, agent = agent_id, "Session started");
        self.emit(OrchestratorEvent::SessionStarted {
            session_id,
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// Submit one captured audio frame; never blocks
    ///
    /// Dropped (and counted) when the session is not active or outbound
    /// audio is muted. A loud frame while the agent is speaking doubles as
    /// a local barge-in hint.
    pub fn submit_audio_frame(&self, frame: AudioFrame) {
        let threshold = self.inner.settings.barge_in_min_energy_db;
        let (tx, local_barge_in) = {
            let mut shared = self.inner.shared.lock();
            let active = shared
                .session
                .as_ref()
                .map(|s| s.is_active())
                .unwrap_or(false);
            if !active || shared.muted {
                shared.dropped_frames += 1;
                metrics::counter!("parley_outbound_frames_dropped").increment(1);
                if shared.dropped_frames % 100 == 1 {
                    tracing::trace!(
                        dropped = shared.dropped_frames,
                        "Dropping captured frame, session not accepting audio"
                    );
                }
                return;
            }
            let loud = !frame.is_likely_silence(threshold);
            (shared.outbound.clone(), loud && shared.agent_turn_open())
        };

        if local_barge_in {
            tracing::debug!(energy_db = frame.energy_db, "Local barge-in hint");
            self.barge_in();
        }

        if let Some(tx) = tx {
            let text = parley_codec::encode(&OutboundEvent::AudioChunk { frame });
            if tx.try_send(text).is_err() {
                let mut shared = self.inner.shared.lock();
                shared.dropped_frames += 1;
                metrics::counter!("parley_outbound_frames_dropped").increment(1);
            }
        }
    }

    /// Request a switch to another agent persona
    ///
    /// Queued until the agent's current turn completes; executes right away
    /// if the agent does not hold the floor.
    pub async fn request_switch(&self, target_agent_id: &str) -> Result<()> {
        self.queue_switch(target_agent_id, None)?;
        self.maybe_execute_switch_now().await;
        Ok(())
    }

    /// End the conversation gracefully
    pub async fn stop(&self) -> Result<()> {
        let (session_id, outbound) = {
            let mut shared = self.inner.shared.lock();
            let session_id = {
                let Some(session) = shared.session.as_mut() else {
                    return Ok(());
                };
                session.state = SessionState::Closing;
                session.id.clone()
            };
            shared.stopping = true;
            shared.muted = true;
            (session_id, shared.outbound.clone())
        };

        if let Some(tx) = outbound {
            let bye = parley_codec::encode(&OutboundEvent::SessionEnd {
                session_id: session_id.clone(),
            });
            let _ = tx.send(bye).await;
        }

        // Bounded grace for in-flight tools; past it they are abandoned and
        // their late results discarded
        self.await_invocation_drain(Duration::from_millis(self.inner.settings.stop_grace_ms))
            .await;

        let shutdown = {
            let mut shared = self.inner.shared.lock();
            let abandoned = shared.pending_invocations.len();
            if abandoned > 0 {
                tracing::warn!(abandoned, "Stopping with tool invocations still in flight");
            }
            shared.pending_invocations.clear();
            shared.pending_switch = None;
            shared.switch_phase = SwitchPhase::Idle;
            shared.outbound = None;
            shared.inbound_tx = None;
            shared.results_tx = None;
            shared.session = None;
            shared.shutdown.take()
        };
        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }

        tracing::info!(session_id = %session_id, "Session stopped");
        self.emit(OrchestratorEvent::SessionEnded { session_id });
        Ok(())
    }

    // --- observational accessors -------------------------------------------

    pub fn state(&self) -> SessionState {
        self.inner
            .shared
            .lock()
            .session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn active_agent_id(&self) -> Option<String> {
        self.inner
            .shared
            .lock()
            .session
            .as_ref()
            .map(|s| s.agent.id.clone())
    }

    pub fn dropped_frame_count(&self) -> u64 {
        self.inner.shared.lock().dropped_frames
    }

    pub fn pending_invocation_count(&self) -> usize {
        self.inner.shared.lock().pending_invocations.len()
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.inner.shared.lock().history.turns().to_vec()
    }

    // --- connection management ---------------------------------------------

    async fn connect_with_backoff(&self, session_id: &str) -> Result<Box<dyn ModelStream>> {
        let attempts = self.inner.settings.max_connect_attempts.max(1);
        let base = self.inner.settings.connect_backoff_ms;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.inner.transport.connect(session_id).await {
                Ok(stream) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Connected after retry");
                    }
                    return Ok(stream);
                },
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(attempt, error = %e, "Connection attempt failed");
                    if attempt < attempts {
                        let backoff = base.saturating_mul(1 << (attempt - 1));
                        let jitter = rand::thread_rng().gen_range(0..=base.max(2) / 2);
                        tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
                    }
                },
            }
        }

        Err(OrchestratorError::SessionStartFailed {
            attempts,
            last_error,
        })
    }

    /// Connect, spawn a pump for the new stream, and send session-start.
    /// On success the new stream replaces the current one (retiring its
    /// pump) and becomes the outbound path.
    async fn open_stream(
        &self,
        agent: &Arc<AgentDefinition>,
        session_id: &str,
        context: Option<String>,
    ) -> Result<()> {
        let stream = self.connect_with_backoff(session_id).await?;

        let (generation, inbound_tx) = {
            let mut shared = self.inner.shared.lock();
            shared.generation += 1;
            (shared.generation, shared.inbound_tx.clone())
        };
        let inbound_tx = inbound_tx
            .ok_or_else(|| OrchestratorError::NotActive("no session".to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        spawn_pump(stream, generation, outbound_rx, inbound_tx);

        let hello = parley_codec::encode(&OutboundEvent::SessionStart {
            session_id: session_id.to_string(),
            agent: (**agent).clone(),
            context,
        });
        outbound_tx.send(hello).await.map_err(|_| {
            OrchestratorError::StreamUnavailable("stream closed before session start".to_string())
        })?;

        self.inner.shared.lock().outbound = Some(outbound_tx);
        Ok(())
    }

    // --- router ------------------------------------------------------------

    async fn run_router(
        self,
        mut inbound_rx: mpsc::Receiver<PumpFrame>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                frame = inbound_rx.recv() => match frame {
                    Some(PumpFrame::Inbound(generation, text)) => {
                        self.on_wire(generation, text).await;
                    }
                    Some(PumpFrame::Closed(generation)) => {
                        self.on_stream_closed(generation).await;
                    }
                    None => break,
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Router stopped");
    }

    async fn run_resolutions(self, mut results_rx: mpsc::Receiver<ToolResolution>) {
        while let Some(resolution) = results_rx.recv().await {
            self.on_tool_resolution(resolution).await;
        }
    }

    async fn on_wire(&self, generation: u64, text: String) {
        {
            let shared = self.inner.shared.lock();
            if generation != shared.generation || shared.stopping {
                return;
            }
        }

        match parley_codec::decode(&text) {
            Ok(event) => self.on_inbound(event).await,
            Err(e) => {
                metrics::counter!("parley_decode_errors").increment(1);
                tracing::warn!(error = %e, "Skipping undecodable message");
                if self.record_decode_error() {
                    self.handle_stream_failure("decode error threshold exceeded".to_string())
                        .await;
                }
            },
        }
    }

    /// True when the short-window decode error budget is spent
    fn record_decode_error(&self) -> bool {
        let window = Duration::from_millis(self.inner.settings.decode_error_window_ms);
        let threshold = self.inner.settings.decode_error_threshold;
        let mut shared = self.inner.shared.lock();
        let now = Instant::now();
        shared.decode_errors.push_back(now);
        while shared
            .decode_errors
            .front()
            .map_or(false, |t| now.duration_since(*t) > window)
        {
            shared.decode_errors.pop_front();
        }
        shared.decode_errors.len() as u32 > threshold
    }

    async fn on_inbound(&self, event: InboundEvent) {
        match event {
            InboundEvent::TranscriptDelta {
                role,
                text,
                is_final,
            } => {
                let turn_id = self.inner.shared.lock().history.append_text(role, &text);
                self.emit(OrchestratorEvent::TranscriptUpdate {
                    turn_id,
                    role,
                    text,
                    is_final,
                });
            },

            InboundEvent::AudioChunk { frame } => {
                let turn_id = {
                    let mut shared = self.inner.shared.lock();
                    let open = shared
                        .history
                        .turns()
                        .iter()
                        .rev()
                        .find(|t| t.role == TurnRole::Agent && t.is_open())
                        .map(|t| t.id);
                    match open {
                        Some(id) => Some(id),
                        None => {
                            // Audio trailing an interrupted turn is dead; a
                            // fresh response opens with its transcript first
                            let last = shared
                                .history
                                .turns()
                                .iter()
                                .rev()
                                .find(|t| t.role == TurnRole::Agent);
                            match last {
                                Some(t) if t.state == TurnState::Interrupted => None,
                                _ => Some(shared.history.open_turn(TurnRole::Agent)),
                            }
                        },
                    }
                };
                match turn_id {
                    Some(id) => {
                        self.inner.audio.enqueue_playback(frame, id);
                    },
                    None => {
                        tracing::trace!("Suppressing audio for interrupted turn");
                    },
                }
            },

            InboundEvent::TurnComplete { role } => {
                let (closed, execute_switch) = {
                    let mut shared = self.inner.shared.lock();
                    let closed = shared.history.complete_turn(role);
                    let execute = role == TurnRole::Agent
                        && shared.switch_phase == SwitchPhase::Pending;
                    (closed, execute)
                };
                if let Some(turn_id) = closed {
                    self.emit(OrchestratorEvent::TurnCompleted { turn_id, role });
                }
                if execute_switch {
                    self.execute_switch().await;
                }
            },

            InboundEvent::ToolInvocation(invocation) => {
                self.on_tool_invocation(invocation).await;
            },

            InboundEvent::Interrupted => self.barge_in(),

            InboundEvent::StreamError { message } => {
                self.handle_stream_failure(message).await;
            },
        }
    }

    // --- barge-in ----------------------------------------------------------

    /// Cut agent playback: mark the open agent turn interrupted and flush
    /// its queued frames. Frames for that turn arriving later are rejected
    /// by the playback watermark.
    fn barge_in(&self) {
        let interrupted = self.inner.shared.lock().history.interrupt_agent_turn();
        if let Some(turn_id) = interrupted {
            let discarded = self.inner.audio.interrupt(turn_id);
            metrics::counter!("parley_barge_ins").increment(1);
            tracing::debug!(turn = turn_id, discarded, "Barge-in");
            self.emit(OrchestratorEvent::TurnInterrupted { turn_id });
        }
    }

    // --- tools -------------------------------------------------------------

    async fn on_tool_invocation(&self, invocation: parley_core::ToolInvocation) {
        if invocation.tool_name == SWITCH_AGENT_TOOL {
            self.on_switch_tool(invocation).await;
            return;
        }

        let (allowed, results_tx) = {
            let shared = self.inner.shared.lock();
            let allowed = shared
                .session
                .as_ref()
                .map(|s| s.agent.tools.clone())
                .unwrap_or_default();
            (allowed, shared.results_tx.clone())
        };
        let Some(results_tx) = results_tx else {
            return;
        };

        let invocation_id = invocation.invocation_id.clone();
        let tool_name = invocation.tool_name.clone();

        // Inserted before dispatch so a fast resolution always finds it
        self.inner
            .shared
            .lock()
            .pending_invocations
            .insert(invocation_id.clone());

        match self
            .inner
            .dispatcher
            .dispatch(invocation, &allowed, results_tx)
        {
            Ok(()) => {
                self.emit(OrchestratorEvent::ToolStarted {
                    invocation_id,
                    tool_name,
                });
            },
            Err(e) => {
                self.inner
                    .shared
                    .lock()
                    .pending_invocations
                    .remove(&invocation_id);
                tracing::warn!(tool = %tool_name, error = %e, "Tool invocation rejected");
                self.send_outbound(OutboundEvent::ToolResult {
                    invocation_id: invocation_id.clone(),
                    outcome: ToolOutcome::error(e.to_string()),
                })
                .await;
                self.emit(OrchestratorEvent::ToolResolved {
                    invocation_id,
                    tool_name,
                    is_error: true,
                    duration_ms: 0,
                });
            },
        }
    }

    async fn on_tool_resolution(&self, resolution: ToolResolution) {
        let known = self
            .inner
            .shared
            .lock()
            .pending_invocations
            .remove(&resolution.invocation_id);
        if !known {
            // Abandoned past grace, or a duplicate; resolved at most once
            tracing::debug!(
                invocation = %resolution.invocation_id,
                "Discarding unexpected tool resolution"
            );
            return;
        }

        self.send_outbound(OutboundEvent::ToolResult {
            invocation_id: resolution.invocation_id.clone(),
            outcome: resolution.outcome.clone(),
        })
        .await;
        self.emit(OrchestratorEvent::ToolResolved {
            invocation_id: resolution.invocation_id,
            tool_name: resolution.tool_name,
            is_error: resolution.outcome.is_error(),
            duration_ms: resolution.duration_ms,
        });
    }

    // --- agent switching ---------------------------------------------------

    async fn on_switch_tool(&self, invocation: parley_core::ToolInvocation) {
        let target = invocation
            .arguments
            .get("target_agent_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let outcome = match self.queue_switch(&target, Some(invocation.invocation_id.clone())) {
            Ok(()) => ToolOutcome::success(serde_json::json!({
                "status": "switch_pending",
                "target_agent_id": target,
            })),
            Err(e) => ToolOutcome::error(e.to_string()),
        };
        let accepted = !outcome.is_error();

        self.send_outbound(OutboundEvent::ToolResult {
            invocation_id: invocation.invocation_id,
            outcome,
        })
        .await;

        if accepted {
            self.maybe_execute_switch_now().await;
        }
    }

    fn queue_switch(&self, target: &str, origin_invocation_id: Option<String>) -> Result<()> {
        if !self.inner.registry.contains(target) {
            return Err(OrchestratorError::AgentNotFound(target.to_string()));
        }

        let mut shared = self.inner.shared.lock();
        let Some(session) = shared.session.as_ref() else {
            return Err(OrchestratorError::NotActive("idle".to_string()));
        };
        if !session.is_active() {
            return Err(OrchestratorError::NotActive(session.state.to_string()));
        }
        if shared.switch_phase != SwitchPhase::Idle {
            return Err(OrchestratorError::SwitchAlreadyPending);
        }

        shared.pending_switch = Some(SwitchRequest::new(target, origin_invocation_id));
        shared.switch_phase = SwitchPhase::Pending;
        drop(shared);

        tracing::info!(switch_target = target, "Agent switch queued");
        self.emit(OrchestratorEvent::SwitchStarted {
            target_agent_id: target.to_string(),
        });
        Ok(())
    }

    /// Execute a pending switch immediately if the agent does not hold the
    /// floor; otherwise it runs at the agent's next turn-complete
    async fn maybe_execute_switch_now(&self) {
        let floor_free = {
            let shared = self.inner.shared.lock();
            shared.switch_phase == SwitchPhase::Pending && !shared.agent_turn_open()
        };
        if floor_free {
            self.execute_switch().await;
        }
    }

    async fn execute_switch(&self) {
        // Claim the Pending -> Draining edge; only one caller wins
        let request = {
            let mut shared = self.inner.shared.lock();
            if shared.switch_phase != SwitchPhase::Pending {
                return;
            }
            let Some(request) = shared.pending_switch.clone() else {
                shared.switch_phase = SwitchPhase::Idle;
                return;
            };
            shared.switch_phase = SwitchPhase::Draining;
            shared.muted = true;
            request
        };

        self.await_invocation_drain(Duration::from_millis(self.inner.settings.drain_timeout_ms))
            .await;

        let (old_agent, context) = {
            let mut shared = self.inner.shared.lock();
            shared.switch_phase = SwitchPhase::Reconnecting;
            // Dropping the outbound sender retires the old pump and stream
            shared.outbound = None;
            let Some(session) = shared.session.as_ref() else {
                shared.switch_phase = SwitchPhase::Idle;
                shared.pending_switch = None;
                shared.muted = false;
                return;
            };
            let agent = Arc::clone(&session.agent);
            let context = shared
                .history
                .condensed_context(&agent.id, self.inner.settings.context_turns);
            (agent, context)
        };

        let Some(target) = self.inner.registry.get(&request.target_agent_id) else {
            // Registry is immutable, so this only happens if queue_switch
            // was bypassed; treat as a failed switch
            self.finish_failed_switch(&request.target_agent_id, "agent not found", &old_agent, &context)
                .await;
            return;
        };

        let new_session_id = uuid::Uuid::new_v4().to_string();
        match self
            .open_stream(&target, &new_session_id, Some(context.clone()))
            .await
        {
            Ok(()) => {
                {
                    let mut shared = self.inner.shared.lock();
                    let mut session = Session::new(new_session_id.clone(), Arc::clone(&target));
                    session.state = SessionState::Active;
                    shared.session = Some(session);
                    shared.muted = false;
                    shared.pending_switch = None;
                    shared.switch_phase = SwitchPhase::Idle;
                }
                metrics::counter!("parley_agent_switches").increment(1);
                tracing::info!(
                    agent = %target.id,
                    session_id = %new_session_id,
                    "Agent switch complete"
                );
                self.emit(OrchestratorEvent::SwitchCompleted {
                    session_id: new_session_id,
                    agent_id: target.id.clone(),
                });
            },
            Err(e) => {
                self.finish_failed_switch(
                    &request.target_agent_id,
                    &e.to_string(),
                    &old_agent,
                    &context,
                )
                .await;
            },
        }
    }

    /// Switch target unreachable: reconnect to the previous agent so the
    /// conversation never ends agent-less
    async fn finish_failed_switch(
        &self,
        target: &str,
        reason: &str,
        old_agent: &Arc<AgentDefinition>,
        context: &str,
    ) {
        metrics::counter!("parley_switch_failures").increment(1);
        tracing::warn!(switch_target = target, reason, "Agent switch failed, restoring previous agent");

        let fallback_session_id = uuid::Uuid::new_v4().to_string();
        match self
            .open_stream(old_agent, &fallback_session_id, Some(context.to_string()))
            .await
        {
            Ok(()) => {
                {
                    let mut shared = self.inner.shared.lock();
                    let mut session =
                        Session::new(fallback_session_id, Arc::clone(old_agent));
                    session.state = SessionState::Active;
                    shared.session = Some(session);
                    shared.muted = false;
                    shared.pending_switch = None;
                    shared.switch_phase = SwitchPhase::Idle;
                }
                self.emit(OrchestratorEvent::SwitchFailed {
                    target_agent_id: target.to_string(),
                    reason: reason.to_string(),
                });
            },
            Err(e) => {
                self.emit(OrchestratorEvent::SwitchFailed {
                    target_agent_id: target.to_string(),
                    reason: reason.to_string(),
                });
                self.fail_session(format!(
                    "switch failed and previous agent unreachable: {}",
                    e
                ))
                .await;
            },
        }
    }

    // --- stream failure and teardown ---------------------------------------

    async fn on_stream_closed(&self, generation: u64) {
        {
            let shared = self.inner.shared.lock();
            if generation != shared.generation || shared.stopping {
                return;
            }
            // A switch replaces the stream on purpose
            if shared.switch_phase == SwitchPhase::Reconnecting {
                return;
            }
        }
        self.handle_stream_failure("stream closed by remote".to_string())
            .await;
    }

    /// One automatic reconnect with the same agent; a second failure is
    /// terminal
    async fn handle_stream_failure(&self, message: String) {
        metrics::counter!("parley_stream_failures").increment(1);
        self.emit(OrchestratorEvent::SessionError {
            message: OrchestratorError::StreamFailure(message.clone()).to_string(),
        });

        let reconnect = {
            let mut shared = self.inner.shared.lock();
            if shared.session.is_none() || shared.stopping {
                return;
            }
            shared.outbound = None;
            if shared.reconnected {
                None
            } else {
                shared.reconnected = true;
                let session = shared.session.as_ref().map(|s| Arc::clone(&s.agent));
                let context = session.as_ref().map(|agent| {
                    shared
                        .history
                        .condensed_context(&agent.id, self.inner.settings.context_turns)
                });
                session.zip(context)
            }
        };

        match reconnect {
            Some((agent, context)) => {
                let new_session_id = uuid::Uuid::new_v4().to_string();
                match self.open_stream(&agent, &new_session_id, Some(context)).await {
                    Ok(()) => {
                        if let Some(session) = self.inner.shared.lock().session.as_mut() {
                            session.id = new_session_id.clone();
                            session.state = SessionState::Active;
                        }
                        metrics::counter!("parley_reconnects").increment(1);
                        tracing::info!(session_id = %new_session_id, "Reconnected after stream failure");
                        self.emit(OrchestratorEvent::Reconnected {
                            session_id: new_session_id,
                        });
                    },
                    Err(e) => self.fail_session(e.to_string()).await,
                }
            },
            None => self.fail_session(message).await,
        }
    }

    async fn fail_session(&self, reason: String) {
        tracing::error!(reason = %reason, "Session failed");
        let (session_id, shutdown) = {
            let mut shared = self.inner.shared.lock();
            shared.stopping = true;
            shared.muted = true;
            shared.outbound = None;
            shared.pending_switch = None;
            shared.switch_phase = SwitchPhase::Idle;
            shared.pending_invocations.clear();
            shared.inbound_tx = None;
            shared.results_tx = None;
            (shared.session.take().map(|s| s.id), shared.shutdown.take())
        };
        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }
        self.emit(OrchestratorEvent::SessionError { message: reason });
        if let Some(session_id) = session_id {
            self.emit(OrchestratorEvent::SessionEnded { session_id });
        }
    }

    // --- helpers -----------------------------------------------------------

    async fn await_invocation_drain(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.inner.shared.lock().pending_invocations.is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn send_outbound(&self, event: OutboundEvent) {
        let tx = self.inner.shared.lock().outbound.clone();
        if let Some(tx) = tx {
            if tx.send(parley_codec::encode(&event)).await.is_err() {
                tracing::debug!("Outbound channel closed, message dropped");
            }
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine; the sink is observational
        let _ = self.inner.events.send(event);
    }
}

/// The stream pump: forwards outbound messages into the stream and inbound
/// frames to the router. Exits when the stream closes or its outbound
/// sender is dropped (stream retired).
fn spawn_pump(
    mut stream: Box<dyn ModelStream>,
    generation: u64,
    mut outbound_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::Sender<PumpFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                out = outbound_rx.recv() => match out {
                    Some(text) => {
                        if stream.send(text).await.is_err() {
                            let _ = inbound_tx.send(PumpFrame::Closed(generation)).await;
                            break;
                        }
                    }
                    None => {
                        stream.close().await;
                        break;
                    }
                },
                frame = stream.recv() => match frame {
                    Some(text) => {
                        if inbound_tx
                            .send(PumpFrame::Inbound(generation, text))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    None => {
                        let _ = inbound_tx.send(PumpFrame::Closed(generation)).await;
                        break;
                    }
                },
            }
        }
        tracing::debug!(generation, "Pump stopped");
    })
}
