//! Knowledge lookup tool
//!
//! A small retrieval-backed tool agents can use to answer factual questions.
//! The backend is a trait so deployments can plug in whatever store they
//! have; the bundled static backend serves tests and demos.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolError};

/// Source of answers for [`KnowledgeLookupTool`]
#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    /// Look up an answer for the query; `None` means no match
    async fn lookup(&self, query: &str) -> Result<Option<String>, ToolError>;
}

/// In-memory backend keyed by lowercase substring match
#[derive(Default)]
pub struct StaticKnowledgeBackend {
    entries: HashMap<String, String>,
}

impl StaticKnowledgeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, key: impl Into<String>, answer: impl Into<String>) -> Self {
        self.entries.insert(key.into().to_lowercase(), answer.into());
        self
    }
}

#[async_trait]
impl KnowledgeBackend for StaticKnowledgeBackend {
    async fn lookup(&self, query: &str) -> Result<Option<String>, ToolError> {
        let query = query.to_lowercase();
        Ok(self
            .entries
            .iter()
            .find(|(key, _)| query.contains(key.as_str()))
            .map(|(_, answer)| answer.clone()))
    }
}

pub struct KnowledgeLookupTool<B> {
    backend: B,
}

impl<B: KnowledgeBackend> KnowledgeLookupTool<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: KnowledgeBackend> Tool for KnowledgeLookupTool<B> {
    fn name(&self) -> &str {
        "knowledge_lookup"
    }

    fn description(&self) -> &str {
        "Look up factual information relevant to the user's question"
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ToolError::InvalidArguments("expected a string 'query' field".into())
            })?;

        match self.backend.lookup(query).await? {
            Some(answer) => Ok(json!({ "found": true, "answer": answer })),
            None => Ok(json!({ "found": false })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> KnowledgeLookupTool<StaticKnowledgeBackend> {
        KnowledgeLookupTool::new(
            StaticKnowledgeBackend::new()
                .with_entry("opening hours", "We are open 9am to 5pm, Monday to Friday."),
        )
    }

    #[tokio::test]
    async fn test_lookup_hit() {
        let out = tool()
            .execute(json!({"query": "What are your opening hours?"}))
            .await
            .unwrap();
        assert_eq!(out["found"], true);
        assert!(out["answer"].as_str().unwrap().contains("9am"));
    }

    #[tokio::test]
    async fn test_lookup_miss() {
        let out = tool().execute(json!({"query": "unrelated"})).await.unwrap();
        assert_eq!(out["found"], false);
    }

    #[tokio::test]
    async fn test_missing_query_field() {
        let err = tool().execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
