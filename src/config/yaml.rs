use serde::Deserialize;
use std::path::PathBuf;

use crate::core::realtime::{ToolDefinition, TurnDetectionConfig};

/// Complete YAML configuration structure
///
/// Every field is optional; values present here override the environment.
///
/// # Example YAML structure
/// ```yaml
/// openai:
///   api_key: "sk-..."
///   url: "wss://api.openai.com/v1/realtime"
///
/// session:
///   model: "gpt-4o-realtime-preview"
///   voice: "verse"
///   instructions: "You are a terse pair programmer."
///   audio_format: "pcm16"
///   transcription_model: "whisper-1"
///   temperature: 0.7
///   turn_detection:
///     type: server_vad
///     silence_duration_ms: 500
///   tools:
///     - name: "run_tests"
///       description: "Run the project's test suite"
///       parameters:
///         type: object
///         properties:
///           filter: { type: string }
///
/// engine:
///   handshake_timeout_ms: 10000
///   event_queue_capacity: 256
///   forward_lifecycle: false
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub openai: Option<OpenAIYaml>,
    pub session: Option<SessionYaml>,
    pub engine: Option<EngineYaml>,
}

/// Service credentials and endpoint
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub url: Option<String>,
}

/// Session options sent in `session.update`
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub audio_format: Option<String>,
    pub transcription_model: Option<String>,
    pub temperature: Option<f32>,
    pub turn_detection: Option<TurnDetectionConfig>,
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Engine tuning
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EngineYaml {
    pub handshake_timeout_ms: Option<u64>,
    pub event_queue_capacity: Option<usize>,
    pub forward_lifecycle: Option<bool>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
