//! Tool trait and errors

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Default timeout for tool execution (30 seconds)
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// No handler registered under this name
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The active agent's tool set does not include this name
    #[error("tool '{0}' not permitted for the active agent")]
    NotPermitted(String),

    /// The handler returned a failure or panicked
    #[error("tool execution failed: {0}")]
    Execution(String),

    /// The handler exceeded its timeout
    #[error("tool '{tool}' timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    /// The input payload did not match what the handler expects
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    pub fn not_found(name: impl Into<String>) -> Self {
        ToolError::NotFound(name.into())
    }

    pub fn not_permitted(name: impl Into<String>) -> Self {
        ToolError::NotPermitted(name.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        ToolError::Execution(message.into())
    }

    pub fn timeout(tool: impl Into<String>, seconds: u64) -> Self {
        ToolError::Timeout {
            tool: tool.into(),
            seconds,
        }
    }
}

/// A local capability the model may invoke
///
/// Handlers receive the structured input payload and return a structured
/// result or a typed failure. They must be safe to run concurrently.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable name the model invokes this tool by
    fn name(&self) -> &str;

    /// Short description surfaced to the model at session start
    fn description(&self) -> &str;

    /// Execute with the given structured input
    async fn execute(&self, arguments: Value) -> Result<Value, ToolError>;

    /// Per-tool execution timeout
    fn timeout_secs(&self) -> u64 {
        DEFAULT_TOOL_TIMEOUT_SECS
    }
}

/// Adapter wrapping a closure as a [`Tool`]
///
/// Handy for tests and for registering simple handlers without a struct.
pub struct FnTool<F> {
    name: String,
    description: String,
    timeout_secs: u64,
    handler: F,
}

impl<F> FnTool<F>
where
    F: Fn(Value) -> Result<Value, ToolError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            handler,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(Value) -> Result<Value, ToolError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        (self.handler)(arguments)
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_tool() {
        let tool = FnTool::new("echo", "echoes input", |args| Ok(json!({ "echo": args })));

        assert_eq!(tool.name(), "echo");
        assert_eq!(tool.timeout_secs(), DEFAULT_TOOL_TIMEOUT_SECS);

        let out = tool.execute(json!("hi")).await.unwrap();
        assert_eq!(out["echo"], "hi");
    }

    #[test]
    fn test_error_display() {
        let err = ToolError::timeout("slow_tool", 5);
        assert_eq!(err.to_string(), "tool 'slow_tool' timed out after 5s");
    }
}
