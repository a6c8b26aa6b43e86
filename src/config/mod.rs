//! Configuration module for the session engine
//!
//! Configuration is loaded from environment variables and optionally
//! overridden by a YAML file. Priority: YAML > ENV > defaults.
//!
//! # Environment variables
//!
//! - `OPENAI_API_KEY` (required)
//! - `REALTIME_URL`, `REALTIME_MODEL`, `REALTIME_VOICE`
//! - `REALTIME_INSTRUCTIONS`, `REALTIME_AUDIO_FORMAT`
//! - `REALTIME_TRANSCRIPTION_MODEL`
//! - `REALTIME_HANDSHAKE_TIMEOUT_MS`, `REALTIME_EVENT_QUEUE_CAPACITY`
//! - `REALTIME_FORWARD_LIFECYCLE`
//!
//! Turn detection and tool definitions are only read from YAML.

mod env;
mod validation;
mod yaml;

use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroize;

use crate::core::realtime::{
    DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_REALTIME_MODEL,
    InputTranscriptionConfig, RealtimeConfig, ToolDefinition, TurnDetectionConfig,
};

pub use validation::{
    validate_api_key, validate_engine_limits, validate_realtime_url, validate_session_options,
};
pub use yaml::YamlConfig;

/// Engine configuration
///
/// The API key is zeroized on drop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub openai_api_key: String,
    /// Empty selects the public endpoint
    pub realtime_url: String,
    pub model: String,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    /// Used for both input and output audio
    pub audio_format: Option<String>,
    pub transcription_model: Option<String>,
    pub temperature: Option<f32>,
    pub turn_detection: Option<TurnDetectionConfig>,
    pub tools: Vec<ToolDefinition>,
    pub handshake_timeout_ms: u64,
    pub event_queue_capacity: usize,
    pub forward_lifecycle: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            realtime_url: String::new(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: None,
            instructions: None,
            audio_format: None,
            transcription_model: None,
            temperature: None,
            turn_detection: None,
            tools: Vec::new(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            forward_lifecycle: false,
        }
    }
}

impl Drop for EngineConfig {
    fn drop(&mut self) {
        self.openai_api_key.zeroize();
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file layered over the environment
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml = YamlConfig::from_file(path)?;
        let mut config = env::load()?;
        config.apply_yaml(yaml);
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(openai) = yaml.openai {
            if let Some(key) = openai.api_key {
                self.openai_api_key.zeroize();
                self.openai_api_key = key;
            }
            if let Some(url) = openai.url {
                self.realtime_url = url;
            }
        }

        if let Some(session) = yaml.session {
            if let Some(model) = session.model {
                self.model = model;
            }
            if session.voice.is_some() {
                self.voice = session.voice;
            }
            if session.instructions.is_some() {
                self.instructions = session.instructions;
            }
            if session.audio_format.is_some() {
                self.audio_format = session.audio_format;
            }
            if session.transcription_model.is_some() {
                self.transcription_model = session.transcription_model;
            }
            if session.temperature.is_some() {
                self.temperature = session.temperature;
            }
            if session.turn_detection.is_some() {
                self.turn_detection = session.turn_detection;
            }
            if let Some(tools) = session.tools {
                self.tools = tools;
            }
        }

        if let Some(engine) = yaml.engine {
            if let Some(ms) = engine.handshake_timeout_ms {
                self.handshake_timeout_ms = ms;
            }
            if let Some(capacity) = engine.event_queue_capacity {
                self.event_queue_capacity = capacity;
            }
            if let Some(forward) = engine.forward_lifecycle {
                self.forward_lifecycle = forward;
            }
        }
    }

    /// Validate the merged configuration
    pub fn validate(&self) -> Result<(), String> {
        validate_api_key(&self.openai_api_key)?;
        validate_realtime_url(&self.realtime_url)?;
        validate_engine_limits(self.handshake_timeout_ms, self.event_queue_capacity)?;
        validate_session_options(self.voice.as_deref(), self.audio_format.as_deref())?;
        Ok(())
    }

    /// Session client configuration derived from these settings
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.openai_api_key.clone(),
            url: self.realtime_url.clone(),
            model: self.model.clone(),
            voice: self.voice.clone(),
            instructions: self.instructions.clone(),
            temperature: self.temperature,
            input_audio_format: self.audio_format.clone(),
            output_audio_format: self.audio_format.clone(),
            input_audio_transcription: self
                .transcription_model
                .clone()
                .map(|model| InputTranscriptionConfig { model }),
            turn_detection: self.turn_detection.clone(),
            tools: self.tools.clone(),
            event_queue_capacity: self.event_queue_capacity,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            forward_lifecycle: self.forward_lifecycle,
            ..Default::default()
        }
    }
}
