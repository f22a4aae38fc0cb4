//! Local event model
//!
//! Events as the orchestrator sees them, on either side of the protocol
//! codec. The codec translates these to and from the remote service's wire
//! format; nothing here knows about encodings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

use crate::agent::AgentDefinition;
use crate::audio::AudioFrame;
use crate::turn::TurnRole;

/// A tool call requested by the model, pending execution
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Unique within the session's lifetime
    pub invocation_id: String,
    pub tool_name: String,
    /// Opaque structured input
    pub arguments: Value,
    /// When the invocation was decoded/dispatched
    pub dispatched_at: Instant,
}

impl ToolInvocation {
    pub fn new(invocation_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            tool_name: tool_name.into(),
            arguments,
            dispatched_at: Instant::now(),
        }
    }
}

/// Outcome of a tool invocation, sent back upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { result: Value },
    Error { message: String },
}

impl ToolOutcome {
    pub fn success(result: Value) -> Self {
        ToolOutcome::Success { result }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolOutcome::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error { .. })
    }
}

/// A resolved tool invocation, correlated by invocation id
#[derive(Debug, Clone)]
pub struct ToolResolution {
    pub invocation_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
}

/// A pending agent-switch intent
///
/// At most one may be pending per session; a second request while one is in
/// flight is rejected with `SwitchAlreadyPending`.
#[derive(Debug, Clone)]
pub struct SwitchRequest {
    pub target_agent_id: String,
    /// Set when the switch was triggered by a model tool call
    pub origin_invocation_id: Option<String>,
    pub requested_at: Instant,
}

impl SwitchRequest {
    pub fn new(target_agent_id: impl Into<String>, origin_invocation_id: Option<String>) -> Self {
        Self {
            target_agent_id: target_agent_id.into(),
            origin_invocation_id,
            requested_at: Instant::now(),
        }
    }
}

/// Events decoded from the remote stream
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Partial or final transcript fragment for either party
    TranscriptDelta {
        role: TurnRole,
        text: String,
        is_final: bool,
    },
    /// Generated speech audio
    AudioChunk { frame: AudioFrame },
    /// The current turn for `role` is complete
    TurnComplete { role: TurnRole },
    /// The model requests a tool call
    ToolInvocation(ToolInvocation),
    /// The service observed the user taking the floor
    Interrupted,
    /// Transport-level failure reported in-band
    StreamError { message: String },
}

/// Events encoded onto the remote stream
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    /// Opens a session for an agent persona, optionally carrying condensed
    /// context from a prior session
    SessionStart {
        session_id: String,
        agent: AgentDefinition,
        context: Option<String>,
    },
    /// Captured user audio
    AudioChunk { frame: AudioFrame },
    /// Result of a model-requested tool call
    ToolResult {
        invocation_id: String,
        outcome: ToolOutcome,
    },
    /// Graceful end of session
    SessionEnd { session_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_outcome_serde_tagging() {
        let ok = ToolOutcome::success(serde_json::json!({"answer": 42}));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");

        let err = ToolOutcome::error("boom");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert!(err.is_error());
    }

    #[test]
    fn test_switch_request_origin() {
        let external = SwitchRequest::new("support", None);
        assert!(external.origin_invocation_id.is_none());

        let via_tool = SwitchRequest::new("support", Some("inv-1".into()));
        assert_eq!(via_tool.origin_invocation_id.as_deref(), Some("inv-1"));
    }
}
