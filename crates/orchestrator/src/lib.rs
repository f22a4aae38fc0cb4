//! Session orchestrator
//!
//! Owns the live conversation: one stream to the remote speech service,
//! capture in, playback out, tool calls dispatched locally, barge-in, and
//! mid-conversation agent switching with context handoff. Everything the
//! UI needs to render flows out of the broadcast event sink; nothing here
//! renders anything.

pub mod events;
pub mod orchestrator;
pub mod session;

pub use events::OrchestratorEvent;
pub use orchestrator::SessionOrchestrator;
pub use session::{Session, SessionState, SwitchPhase};
