//! Base traits and types for the realtime session engine.
//!
//! This module defines the foundational abstractions shared by every part of
//! the engine: the error taxonomy, session configuration, the connection
//! lifecycle state machine, the normalized events handed to consumers, and the
//! `BaseRealtime` trait implemented by provider clients.
//!
//! # Audio Format
//!
//! Input and output audio default to PCM 16-bit signed little-endian at 24kHz.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::queue::EventStream;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Handshake or transport failure. Fatal to the current connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// The service sent a structured `error` event
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// An inbound frame could not be decoded
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Function-call arguments were not a JSON object
    #[error("Invalid tool arguments for call {call_id}: {reason}")]
    ToolArgumentParse {
        /// Call the arguments belong to
        call_id: String,
        /// Parser message
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Default bound on the lossy data sub-channel of the response queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Default handshake timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Base configuration for a realtime session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key attached to the handshake
    pub api_key: String,

    /// WebSocket endpoint; the model is appended as a query parameter.
    /// Empty means the provider default.
    #[serde(default)]
    pub url: String,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    #[serde(default)]
    pub model: String,

    /// Voice ID for audio output
    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Temperature for response generation (0.0 to 2.0)
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Input audio format
    #[serde(default)]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(default)]
    pub output_audio_format: Option<String>,

    /// Enable input audio transcription
    #[serde(default)]
    pub input_audio_transcription: Option<InputTranscriptionConfig>,

    /// Turn detection configuration. `None` leaves the service default.
    #[serde(default)]
    pub turn_detection: Option<TurnDetectionConfig>,

    /// Tool definitions for function calling. May start empty and be
    /// registered later through `configure_tools`.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,

    /// Tool choice strategy
    #[serde(default)]
    pub tool_choice: Option<String>,

    /// Bounded size of the lossy delta sub-channel
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Upper bound on the WebSocket handshake
    #[serde(default = "default_handshake_timeout", with = "duration_ms")]
    pub handshake_timeout: Duration,

    /// Forward session/response lifecycle markers to the consumer.
    /// Off by default: they are only logged.
    #[serde(default)]
    pub forward_lifecycle: bool,
}

fn default_event_queue_capacity() -> usize {
    DEFAULT_EVENT_QUEUE_CAPACITY
}

fn default_handshake_timeout() -> Duration {
    DEFAULT_HANDSHAKE_TIMEOUT
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: String::new(),
            model: String::new(),
            voice: None,
            instructions: None,
            temperature: None,
            input_audio_format: None,
            output_audio_format: None,
            input_audio_transcription: None,
            turn_detection: None,
            tools: Vec::new(),
            tool_choice: None,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            forward_lifecycle: false,
        }
    }
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "whisper-1")
    pub model: String,
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    /// No automatic turn detection; turns end on an explicit commit. Sent to
    /// the service as `null`.
    #[serde(rename = "none")]
    None,
}

/// Tool definition for function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDefinition {
    /// Create a tool with a name, description and parameter schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            parameters: Some(parameters),
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a realtime session.
///
/// ```text
/// Idle -> Connecting -> Active -> Closing -> Closed
///            |                                 ^
///            +------------ (failure) ----------+
/// Closed -> Connecting (restart)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never started
    #[default]
    Idle,
    /// Handshake in progress
    Connecting,
    /// Socket open, read loop running
    Active,
    /// Teardown in progress
    Closing,
    /// Socket released
    Closed,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Closed, Connecting)
                | (Connecting, Active)
                | (Connecting, Closed)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Active => write!(f, "Active"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Consumer Events
// =============================================================================

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// User speech transcript
    User,
    /// Assistant speech transcript
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Whether a transcript is a streaming fragment or the finished text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptStage {
    /// Incremental fragment
    Partial,
    /// Complete transcript
    Final,
}

/// A finalized tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// Call ID used to correlate the result
    pub call_id: String,
    /// Tool name
    pub name: String,
    /// Parsed arguments. Empty when the payload was empty or unparseable.
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// Session and response lifecycle markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `session.created`
    SessionCreated {
        /// Session ID assigned by the service
        session_id: String,
    },
    /// `session.updated`
    SessionUpdated,
    /// `response.created`
    ResponseStarted {
        /// Response ID
        response_id: String,
    },
    /// `response.done`
    ResponseDone {
        /// Response ID
        response_id: String,
        /// Final status reported by the service
        status: Option<String>,
    },
}

/// Normalized event delivered through the response queue.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// Decoded audio fragment
    AudioDelta(Bytes),
    /// Text fragment
    TextDelta(String),
    /// Transcript fragment or completed transcript
    Transcription {
        /// Transcript text
        text: String,
        /// Who spoke
        role: TranscriptRole,
        /// Partial or final
        stage: TranscriptStage,
    },
    /// Fully assembled tool invocation
    FunctionCall(FunctionCallRequest),
    /// Protocol or transport error
    Error {
        /// Best available message
        message: String,
    },
    /// Session/response bookkeeping marker
    Lifecycle(LifecycleEvent),
    /// Frame with an unrecognized `type`
    Unknown(String),
}

impl RealtimeEvent {
    /// Control events travel on the lossless sub-channel.
    pub fn is_control(&self) -> bool {
        match self {
            RealtimeEvent::FunctionCall(_)
            | RealtimeEvent::Error { .. }
            | RealtimeEvent::Lifecycle(_) => true,
            RealtimeEvent::Transcription { stage, .. } => *stage == TranscriptStage::Final,
            RealtimeEvent::AudioDelta(_) | RealtimeEvent::TextDelta(_) | RealtimeEvent::Unknown(_) => {
                false
            }
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeEvent::AudioDelta(_) => "audio_delta",
            RealtimeEvent::TextDelta(_) => "text_delta",
            RealtimeEvent::Transcription { .. } => "transcription",
            RealtimeEvent::FunctionCall(_) => "function_call",
            RealtimeEvent::Error { .. } => "error",
            RealtimeEvent::Lifecycle(_) => "lifecycle",
            RealtimeEvent::Unknown(_) => "unknown",
        }
    }
}

// =============================================================================
// Base Trait
// =============================================================================

/// Base trait for realtime session clients.
///
/// All methods take `&self`; implementations serialize writes internally so
/// any number of tasks may drive one session.
///
/// # Example
///
/// ```rust,ignore
/// use devvoice_engine::core::realtime::{BaseRealtime, OpenAIRealtime, RealtimeConfig};
///
/// let session = OpenAIRealtime::new(RealtimeConfig {
///     api_key: "sk-...".to_string(),
///     ..Default::default()
/// })?;
/// session.start().await?;
/// let mut events = session.take_events().expect("fresh connection");
///
/// session.send_audio(chunk).await?;
/// session.commit_audio().await?;
///
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// ```
#[async_trait]
pub trait BaseRealtime: Send + Sync {
    /// Open the connection. No-op when already active.
    async fn start(&self) -> RealtimeResult<()>;

    /// Tear down the connection. Idempotent.
    async fn close(&self) -> RealtimeResult<()>;

    /// Check if the session has an active socket.
    fn is_ready(&self) -> bool;

    /// Get the current lifecycle state.
    fn connection_state(&self) -> ConnectionState;

    /// Take the event stream of the current connection. Returns `None` if it
    /// was already taken or no connection was ever opened.
    fn take_events(&self) -> Option<EventStream>;

    // -------------------------------------------------------------------------
    // Audio I/O
    // -------------------------------------------------------------------------

    /// Queue one audio chunk. Never requests a response.
    async fn send_audio(&self, audio_data: Bytes) -> RealtimeResult<()>;

    /// Finalize the queued audio as one turn and request a reply.
    async fn commit_audio(&self) -> RealtimeResult<()>;

    /// Discard queued audio.
    async fn clear_audio_buffer(&self) -> RealtimeResult<()>;

    /// Add a user text message to the conversation.
    async fn send_text(&self, text: &str) -> RealtimeResult<()>;

    /// Cancel the in-flight response.
    async fn cancel_response(&self) -> RealtimeResult<()>;

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Replace the tool list and reconfigure the session.
    async fn configure_tools(&self, tools: Vec<ToolDefinition>) -> RealtimeResult<()>;

    /// Replace the system instructions without touching tools.
    async fn update_instructions(&self, instructions: &str) -> RealtimeResult<()>;

    /// Return a tool result and resume generation.
    async fn submit_function_result(
        &self,
        call_id: &str,
        outcome: Result<serde_json::Value, String>,
    ) -> RealtimeResult<()>;

    /// Get provider information.
    fn get_provider_info(&self) -> serde_json::Value;
}
