//! Session lifecycle types

use std::sync::Arc;
use std::time::Instant;

use parley_core::AgentDefinition;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Phase of an in-flight agent switch
///
/// `Idle -> Pending -> Draining -> Reconnecting -> Idle`. Pending waits for
/// the agent's current turn to complete; Draining waits (bounded) for
/// in-flight tool invocations; Reconnecting swaps streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchPhase {
    #[default]
    Idle,
    Pending,
    Draining,
    Reconnecting,
}

/// One conversation with one agent persona over one remote stream
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub agent: Arc<AgentDefinition>,
    pub state: SessionState,
    pub created_at: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>, agent: Arc<AgentDefinition>) -> Self {
        Self {
            id: id.into(),
            agent,
            state: SessionState::Connecting,
            created_at: Instant::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_connecting() {
        let agent = Arc::new(AgentDefinition::new("support", "You help."));
        let session = Session::new("s-1", agent);
        assert_eq!(session.state, SessionState::Connecting);
        assert!(!session.is_active());
    }
}
