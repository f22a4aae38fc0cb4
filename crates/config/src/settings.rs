//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Audio channel configuration
    #[serde(default)]
    pub audio: AudioSettings,

    /// Tool dispatcher configuration
    #[serde(default)]
    pub tools: ToolSettings,

    /// Remote speech model connection
    #[serde(default)]
    pub model: ModelSettings,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,

    /// Path to the agent registry TOML file
    #[serde(default = "default_agents_path")]
    pub agents_path: String,
}

fn default_agents_path() -> String {
    "config/agents.toml".to_string()
}

/// HTTP/WebSocket server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent conversations
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_sessions() -> usize {
    64
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Session orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Bounded connection attempts before SessionStartFailed
    #[serde(default = "default_connect_attempts")]
    pub max_connect_attempts: u32,

    /// Base backoff between connection attempts (doubled each retry, jittered)
    #[serde(default = "default_backoff_ms")]
    pub connect_backoff_ms: u64,

    /// Bounded wait for in-flight tool invocations while draining a switch
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Grace period for outstanding tool invocations on stop()
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Closed turns carried in the condensed context across a switch
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,

    /// Decode errors tolerated within the window before the session fails
    #[serde(default = "default_decode_error_threshold")]
    pub decode_error_threshold: u32,

    /// Sliding window for the decode error threshold
    #[serde(default = "default_decode_error_window_ms")]
    pub decode_error_window_ms: u64,

    /// Minimum frame energy treated as a local barge-in hint while the
    /// agent is speaking
    #[serde(default = "default_barge_in_energy")]
    pub barge_in_min_energy_db: f32,
}

fn default_connect_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    250
}
fn default_drain_timeout_ms() -> u64 {
    3000
}
fn default_stop_grace_ms() -> u64 {
    5000
}
fn default_context_turns() -> usize {
    6
}
fn default_decode_error_threshold() -> u32 {
    5
}
fn default_decode_error_window_ms() -> u64 {
    10_000
}
fn default_barge_in_energy() -> f32 {
    -40.0
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_backoff_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            context_turns: default_context_turns(),
            decode_error_threshold: default_decode_error_threshold(),
            decode_error_window_ms: default_decode_error_window_ms(),
            barge_in_min_energy_db: default_barge_in_energy(),
        }
    }
}

/// Audio I/O channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Capture sample rate in Hz
    #[serde(default = "default_capture_rate")]
    pub capture_sample_rate: u32,

    /// Capture ring depth in frames; oldest is dropped on overflow
    #[serde(default = "default_capture_depth")]
    pub capture_queue_depth: usize,

    /// Playback queue depth in frames
    #[serde(default = "default_playback_depth")]
    pub playback_queue_depth: usize,
}

fn default_capture_rate() -> u32 {
    16_000
}
fn default_capture_depth() -> usize {
    50
}
fn default_playback_depth() -> usize {
    200
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            capture_sample_rate: default_capture_rate(),
            capture_queue_depth: default_capture_depth(),
            playback_queue_depth: default_playback_depth(),
        }
    }
}

/// Tool dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Bound on concurrently in-flight invocations per session
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Fallback timeout for tools that do not declare their own
    #[serde(default = "default_tool_timeout")]
    pub default_timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    4
}
fn default_tool_timeout() -> u64 {
    30
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            default_timeout_secs: default_tool_timeout(),
        }
    }
}

/// Remote speech model connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// ws:// or wss:// endpoint of the conversational speech service
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,
}

fn default_model_endpoint() -> String {
    "ws://localhost:9090/stream".to_string()
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: default_model_endpoint(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Default log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_connect_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.max_connect_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.audio.capture_queue_depth == 0 || self.audio.playback_queue_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.queue_depth".to_string(),
                message: "queue depths must be non-zero".to_string(),
            });
        }

        if self.tools.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tools.max_concurrent".to_string(),
                message: "must allow at least one in-flight invocation".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (PARLEY_ prefix)
/// 2. config/{env}.toml (if env specified)
/// 3. config/default.toml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("PARLEY")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.orchestrator.max_connect_attempts, 3);
        assert_eq!(settings.tools.max_concurrent, 4);
        settings.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let mut settings = Settings::default();
        settings.orchestrator.max_connect_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_queue_depth() {
        let mut settings = Settings::default();
        settings.audio.capture_queue_depth = 0;
        assert!(settings.validate().is_err());
    }
}
