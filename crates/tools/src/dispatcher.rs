//! Concurrent tool dispatcher
//!
//! Runs handlers off the stream pump so a slow tool never stalls audio.
//! Concurrency is bounded per session; a panicking handler is contained and
//! reported as an error outcome over the same channel as a normal result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};

use parley_core::{ToolInvocation, ToolOutcome, ToolResolution};

use crate::registry::ToolRegistry;
use crate::tool::ToolError;

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    permits: Arc<Semaphore>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, max_concurrent: usize) -> Self {
        Self {
            registry,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Dispatch an invocation to its handler
    ///
    /// Permission and lookup failures are returned synchronously so the
    /// caller can turn them into an upstream error result right away.
    /// Everything else resolves asynchronously through `results`: exactly
    /// one [`ToolResolution`] per accepted invocation, whether the handler
    /// succeeded, failed, timed out, or panicked.
    pub fn dispatch(
        &self,
        invocation: ToolInvocation,
        allowed: &[String],
        results: mpsc::Sender<ToolResolution>,
    ) -> Result<(), ToolError> {
        if !allowed.iter().any(|t| t == &invocation.tool_name) {
            metrics::counter!("parley_tool_rejected").increment(1);
            return Err(ToolError::not_permitted(&invocation.tool_name));
        }

        let tool = self
            .registry
            .get(&invocation.tool_name)
            .ok_or_else(|| ToolError::not_found(&invocation.tool_name))?;

        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            // Acquire inside the task so dispatch never blocks the caller;
            // waiting invocations run in dispatch order.
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore closed, session torn down
            };

            let started = std::time::Instant::now();
            let timeout = Duration::from_secs(tool.timeout_secs());
            let name = invocation.tool_name.clone();
            let args = invocation.arguments.clone();

            // Inner spawn isolates handler panics from this resolver task
            let run = tokio::spawn(async move { tool.execute(args).await });
            let abort = run.abort_handle();

            let outcome = match tokio::time::timeout(timeout, run).await {
                Ok(Ok(Ok(value))) => ToolOutcome::success(value),
                Ok(Ok(Err(err))) => {
                    tracing::warn!(tool = %name, error = %err, "Tool handler failed");
                    ToolOutcome::error(err.to_string())
                }
                Ok(Err(join_err)) => {
                    let message = if join_err.is_panic() {
                        format!("tool '{name}' panicked")
                    } else {
                        format!("tool '{name}' was cancelled")
                    };
                    tracing::error!(tool = %name, "{message}");
                    metrics::counter!("parley_tool_panics").increment(1);
                    ToolOutcome::error(message)
                }
                Err(_) => {
                    abort.abort();
                    tracing::warn!(tool = %name, timeout_secs = timeout.as_secs(), "Tool timed out");
                    metrics::counter!("parley_tool_timeouts").increment(1);
                    ToolOutcome::error(
                        ToolError::timeout(&name, timeout.as_secs()).to_string(),
                    )
                }
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            if outcome.is_error() {
                metrics::counter!("parley_tool_errors").increment(1);
            } else {
                metrics::counter!("parley_tool_completed").increment(1);
            }

            let resolution = ToolResolution {
                invocation_id: invocation.invocation_id,
                tool_name: name,
                outcome,
                duration_ms,
            };

            // Receiver gone means the session ended first; nothing to do.
            let _ = results.send(resolution).await;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{FnTool, Tool};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn allowed(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn dispatcher_with(tools: Vec<FnTool<impl Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static>>) -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        ToolDispatcher::new(Arc::new(registry), 4)
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let dispatcher = dispatcher_with(vec![FnTool::new("add", "adds", |args| {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(json!({ "sum": a + b }))
        })]);

        let (tx, mut rx) = mpsc::channel(4);
        dispatcher
            .dispatch(
                ToolInvocation::new("inv-1", "add", json!({"a": 2, "b": 3})),
                &allowed(&["add"]),
                tx,
            )
            .unwrap();

        let resolution = rx.recv().await.unwrap();
        assert_eq!(resolution.invocation_id, "inv-1");
        assert_eq!(
            resolution.outcome,
            ToolOutcome::success(json!({"sum": 5}))
        );
    }

    #[tokio::test]
    async fn test_dispatch_not_permitted() {
        let dispatcher = dispatcher_with(vec![FnTool::new("secret", "hidden", |_| Ok(json!(null)))]);

        let (tx, _rx) = mpsc::channel(4);
        let err = dispatcher
            .dispatch(
                ToolInvocation::new("inv-1", "secret", json!({})),
                &allowed(&["other"]),
                tx,
            )
            .unwrap_err();
        assert!(matches!(err, ToolError::NotPermitted(_)));
    }

    #[tokio::test]
    async fn test_dispatch_not_found() {
        let dispatcher = ToolDispatcher::new(Arc::new(ToolRegistry::new()), 4);

        let (tx, _rx) = mpsc::channel(4);
        let err = dispatcher
            .dispatch(
                ToolInvocation::new("inv-1", "missing", json!({})),
                &allowed(&["missing"]),
                tx,
            )
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_outcome() {
        let dispatcher = dispatcher_with(vec![FnTool::new("fails", "always fails", |_| {
            Err(ToolError::execution("backend unavailable"))
        })]);

        let (tx, mut rx) = mpsc::channel(4);
        dispatcher
            .dispatch(
                ToolInvocation::new("inv-1", "fails", json!({})),
                &allowed(&["fails"]),
                tx,
            )
            .unwrap();

        let resolution = rx.recv().await.unwrap();
        assert!(resolution.outcome.is_error());
    }

    #[tokio::test]
    async fn test_panic_contained_as_error_outcome() {
        struct Panicker;

        #[async_trait]
        impl Tool for Panicker {
            fn name(&self) -> &str {
                "panicker"
            }
            fn description(&self) -> &str {
                "panics"
            }
            async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
                panic!("boom");
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Panicker);
        let dispatcher = ToolDispatcher::new(Arc::new(registry), 4);

        let (tx, mut rx) = mpsc::channel(4);
        dispatcher
            .dispatch(
                ToolInvocation::new("inv-1", "panicker", json!({})),
                &allowed(&["panicker"]),
                tx,
            )
            .unwrap();

        let resolution = rx.recv().await.unwrap();
        assert!(resolution.outcome.is_error());
        match resolution.outcome {
            ToolOutcome::Error { message } => assert!(message.contains("panicked")),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_timeout_resolves_as_error() {
        struct Slow;

        #[async_trait]
        impl Tool for Slow {
            fn name(&self) -> &str {
                "slow"
            }
            fn description(&self) -> &str {
                "sleeps past its timeout"
            }
            async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!(null))
            }
            fn timeout_secs(&self) -> u64 {
                1
            }
        }

        tokio::time::pause();

        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        let dispatcher = ToolDispatcher::new(Arc::new(registry), 4);

        let (tx, mut rx) = mpsc::channel(4);
        dispatcher
            .dispatch(
                ToolInvocation::new("inv-1", "slow", json!({})),
                &allowed(&["slow"]),
                tx,
            )
            .unwrap();

        let resolution = rx.recv().await.unwrap();
        assert!(resolution.outcome.is_error());
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        static RUNNING: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        struct Counting;

        #[async_trait]
        impl Tool for Counting {
            fn name(&self) -> &str {
                "counting"
            }
            fn description(&self) -> &str {
                "tracks concurrent executions"
            }
            async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
                let now = RUNNING.fetch_add(1, Ordering::SeqCst) + 1;
                PEAK.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                RUNNING.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Counting);
        let dispatcher = ToolDispatcher::new(Arc::new(registry), 2);

        let (tx, mut rx) = mpsc::channel(16);
        for i in 0..6 {
            dispatcher
                .dispatch(
                    ToolInvocation::new(format!("inv-{i}"), "counting", json!({})),
                    &allowed(&["counting"]),
                    tx.clone(),
                )
                .unwrap();
        }
        drop(tx);

        let mut resolved = 0;
        while rx.recv().await.is_some() {
            resolved += 1;
        }
        assert_eq!(resolved, 6);
        assert!(PEAK.load(Ordering::SeqCst) <= 2);
    }
}
