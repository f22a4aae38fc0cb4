//! Settings and agent registry
//!
//! Layered configuration (defaults, TOML file, environment override) plus
//! the immutable agent registry loaded once at process start.

pub mod registry;
pub mod settings;

pub use registry::AgentRegistry;
pub use settings::{
    load_settings, AudioSettings, ModelSettings, ObservabilitySettings, OrchestratorSettings,
    ServerSettings, Settings, ToolSettings,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Duplicate agent id: {0}")]
    DuplicateAgent(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
