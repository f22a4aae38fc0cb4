//! Error taxonomy for the orchestrator
//!
//! Transport- and tool-level failures are recovered locally wherever a safe
//! fallback exists; only retry exhaustion or an unrecoverable teardown
//! surfaces one of these to the caller.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The requested agent id is not in the registry
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// A single connection attempt failed
    #[error("stream unavailable: {0}")]
    StreamUnavailable(String),

    /// All bounded connection attempts were exhausted
    #[error("session start failed after {attempts} attempts: {last_error}")]
    SessionStartFailed { attempts: u32, last_error: String },

    /// Mid-session transport error; one automatic reconnect is attempted
    /// before this becomes terminal
    #[error("stream failure: {0}")]
    StreamFailure(String),

    /// A switch request arrived while another was already in flight
    #[error("an agent switch is already pending")]
    SwitchAlreadyPending,

    /// The new session could not be established; the orchestrator fell back
    /// to the prior agent
    #[error("switch to agent '{target}' failed: {reason}")]
    SwitchFailed { target: String, reason: String },

    /// start() was called while a session is already running
    #[error("a session is already active")]
    AlreadyActive,

    /// Operation requires an active session
    #[error("session is not active (state: {0})")]
    NotActive(String),
}

impl OrchestratorError {
    /// Errors after which the conversation continues with a working agent
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::SwitchFailed { .. } | OrchestratorError::SwitchAlreadyPending
        )
    }
}
