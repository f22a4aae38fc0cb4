//! Broadcast events for the UI sink
//!
//! Purely observational: subscribers render transcripts, turn state, tool
//! activity, and switch outcomes. Dropping a subscriber or lagging behind
//! never affects the conversation.

use parley_core::{TurnId, TurnRole};

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    SessionStarted {
        session_id: String,
        agent_id: String,
    },
    /// Mid-session stream loss recovered by the automatic reconnect
    Reconnected {
        session_id: String,
    },
    TranscriptUpdate {
        turn_id: TurnId,
        role: TurnRole,
        text: String,
        is_final: bool,
    },
    TurnCompleted {
        turn_id: TurnId,
        role: TurnRole,
    },
    TurnInterrupted {
        turn_id: TurnId,
    },
    ToolStarted {
        invocation_id: String,
        tool_name: String,
    },
    ToolResolved {
        invocation_id: String,
        tool_name: String,
        is_error: bool,
        duration_ms: u64,
    },
    SwitchStarted {
        target_agent_id: String,
    },
    SwitchCompleted {
        session_id: String,
        agent_id: String,
    },
    SwitchFailed {
        target_agent_id: String,
        reason: String,
    },
    SessionError {
        message: String,
    },
    SessionEnded {
        session_id: String,
    },
}
