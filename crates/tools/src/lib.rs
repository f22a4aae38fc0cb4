//! Tools for the parley orchestrator
//!
//! Tool registration, permission checks, and concurrent dispatch. Handlers
//! run off the stream pump with a per-session concurrency bound; a failing
//! handler becomes an error result, never a dead session.

pub mod dispatcher;
pub mod knowledge;
pub mod registry;
pub mod tool;

pub use dispatcher::ToolDispatcher;
pub use knowledge::{KnowledgeBackend, KnowledgeLookupTool, StaticKnowledgeBackend};
pub use registry::ToolRegistry;
pub use tool::{FnTool, Tool, ToolError};

/// Tool name the orchestrator intercepts to create a switch request; it is
/// never dispatched to a handler.
pub const SWITCH_AGENT_TOOL: &str = "switch_agent";
