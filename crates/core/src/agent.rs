//! Agent persona definitions

use serde::{Deserialize, Serialize};

/// Voice and delivery parameters for an agent persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    /// Remote voice identifier
    pub voice_id: String,
    /// Speaking rate multiplier (1.0 = neutral)
    #[serde(default = "default_rate")]
    pub speaking_rate: f32,
    /// Pitch offset in semitones
    #[serde(default)]
    pub pitch: f32,
}

fn default_rate() -> f32 {
    1.0
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice_id: "neutral".to_string(),
            speaking_rate: 1.0,
            pitch: 0.0,
        }
    }
}

/// An immutable agent persona definition
///
/// Loaded once at process start from the agent registry and shared read-only
/// across sessions via `Arc`. Never mutated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique persona id
    pub id: String,
    /// Human-readable name shown to the UI sink
    #[serde(default)]
    pub display_name: String,
    /// Voice/style parameters
    #[serde(default)]
    pub voice: VoiceParams,
    /// System instruction text sent on session start
    pub instructions: String,
    /// Ordered set of tool names this persona may invoke
    #[serde(default)]
    pub tools: Vec<String>,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, instructions: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            voice: VoiceParams::default(),
            instructions: instructions.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_voice(mut self, voice: VoiceParams) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether this persona may invoke the named tool
    pub fn permits_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }
}
