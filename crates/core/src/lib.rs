//! Core types for the parley conversation orchestrator
//!
//! This crate provides the foundational types shared across all other crates:
//! - Audio frame types and conversions
//! - Conversation turns and history
//! - Agent persona definitions
//! - The local event model (inbound/outbound)
//! - Error taxonomy

pub mod agent;
pub mod audio;
pub mod error;
pub mod event;
pub mod turn;

pub use agent::{AgentDefinition, VoiceParams};
pub use audio::{AudioFrame, Channels, SampleRate};
pub use error::{OrchestratorError, Result};
pub use event::{
    InboundEvent, OutboundEvent, SwitchRequest, ToolInvocation, ToolOutcome, ToolResolution,
};
pub use turn::{ConversationHistory, ConversationTurn, TurnId, TurnRole, TurnState};
