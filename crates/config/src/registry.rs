//! Agent registry
//!
//! Immutable table of agent persona definitions, loaded once at process
//! start and shared read-only across sessions. Not a mutable singleton:
//! the registry is injected into the orchestrator at construction.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parley_core::AgentDefinition;

use crate::ConfigError;

/// Declarative registry file shape: `[agents.<id>]` tables
#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    agents: HashMap<String, AgentTable>,
}

#[derive(Debug, Deserialize)]
struct AgentTable {
    #[serde(default)]
    display_name: Option<String>,
    instructions: String,
    #[serde(default)]
    voice: Option<parley_core::VoiceParams>,
    #[serde(default)]
    tools: Vec<String>,
}

/// Static lookup of agent definitions by id
///
/// Thread-safe for concurrent read-only access; definitions are shared via
/// `Arc` so multiple sessions reference the same agent without copying.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
}

impl AgentRegistry {
    /// Build a registry from definitions, validating uniqueness
    pub fn new(definitions: Vec<AgentDefinition>) -> Result<Self, ConfigError> {
        let mut agents = HashMap::with_capacity(definitions.len());
        for def in definitions {
            if def.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "agent.id".to_string(),
                    message: "agent id must be non-empty".to_string(),
                });
            }
            if agents.contains_key(&def.id) {
                return Err(ConfigError::DuplicateAgent(def.id));
            }
            agents.insert(def.id.clone(), Arc::new(def));
        }
        Ok(Self { agents })
    }

    /// Parse a registry from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: RegistryFile = toml::from_str(text)?;

        let definitions = file
            .agents
            .into_iter()
            .map(|(id, table)| AgentDefinition {
                display_name: table.display_name.unwrap_or_else(|| id.clone()),
                id,
                voice: table.voice.unwrap_or_default(),
                instructions: table.instructions,
                tools: table.tools,
            })
            .collect();

        let registry = Self::new(definitions)?;
        tracing::info!(agents = registry.len(), "Loaded agent registry");
        Ok(registry)
    }

    /// Load the registry from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Static lookup by id
    pub fn get(&self, id: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[agents.support]
display_name = "Support"
instructions = "You handle support questions."
tools = ["lookup_knowledge", "switch_agent"]

[agents.support.voice]
voice_id = "warm"
speaking_rate = 1.1

[agents.sales]
instructions = "You handle sales questions."
tools = ["switch_agent"]
"#;

    #[test]
    fn test_load_from_toml() {
        let registry = AgentRegistry::from_toml_str(SAMPLE).unwrap();
        assert_eq!(registry.len(), 2);

        let support = registry.get("support").unwrap();
        assert_eq!(support.display_name, "Support");
        assert_eq!(support.voice.voice_id, "warm");
        assert!(support.permits_tool("lookup_knowledge"));

        let sales = registry.get("sales").unwrap();
        assert_eq!(sales.display_name, "sales"); // falls back to id
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn test_concurrent_reads_share_definition() {
        let registry = AgentRegistry::from_toml_str(SAMPLE).unwrap();
        let a = registry.get("support").unwrap();
        let b = registry.get("support").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_rejects_empty_id() {
        let result = AgentRegistry::new(vec![AgentDefinition::new("  ", "x")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let registry = AgentRegistry::from_file(&path).unwrap();
        assert!(registry.contains("sales"));

        assert!(AgentRegistry::from_file(dir.path().join("missing.toml")).is_err());
    }
}
