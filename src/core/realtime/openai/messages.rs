//! Wire envelopes of the OpenAI Realtime API.
//!
//! Every frame is one JSON object whose `type` field names the event.
//!
//! Client events (sent to server):
//! - session.update
//! - input_audio_buffer.append / commit / clear
//! - conversation.item.create
//! - response.create / response.cancel
//!
//! Server events are decoded leniently: fields the engine does not need are
//! defaulted so a service-side schema addition never turns a useful frame into
//! a malformed one. Types the engine does not model decode to
//! [`ServerEvent::Unknown`] (see [`super::codec`]).

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Session Configuration
// =============================================================================

/// `session` payload of a `session.update`. Absent fields are left untouched
/// by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// `Some(Value::Null)` disables server-side turn detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Tool definition as the service expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Always "function"
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDef {
    pub fn function(name: String, description: Option<String>, parameters: Option<Value>) -> Self {
        Self {
            tool_type: "function".to_string(),
            name,
            description,
            parameters,
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item, both as sent in `conversation.item.create` and as
/// reported in `response.output_item.*`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// message, function_call or function_call_output
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// Result of a tool invocation, correlated by `call_id`.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.into()),
            output: Some(output.into()),
            ..Default::default()
        }
    }

    /// User text message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.into()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    pub fn is_function_call(&self) -> bool {
        self.item_type == "function_call"
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// input_text, input_audio, text or audio
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

/// `response` payload of a `response.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the OpenAI Realtime API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Base64-encoded audio chunk
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        item: ConversationItem,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
    },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// The `type` discriminator this event serializes with.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the OpenAI Realtime API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Structured error; the nested object may be missing or oddly shaped
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Value,
    },

    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: SessionInfo,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: SessionInfo,
    },

    /// Server VAD detected the start of speech
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: u64,
        #[serde(default)]
        item_id: String,
    },

    /// Server VAD detected the end of speech
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: u64,
        #[serde(default)]
        item_id: String,
    },

    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        #[serde(default)]
        item_id: String,
    },

    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared,

    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        item: ConversationItem,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed {
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        error: Value,
    },

    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: ResponseInfo,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseInfo,
    },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item: ConversationItem,
    },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item: ConversationItem,
    },

    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        #[serde(default)]
        item_id: String,
    },

    #[serde(rename = "response.content_part.done")]
    ContentPartDone {
        #[serde(default)]
        item_id: String,
    },

    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        item_id: String,
        delta: String,
    },

    #[serde(rename = "response.text.done")]
    TextDone {
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        text: String,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        item_id: String,
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        transcript: String,
    },

    /// Base64-encoded audio chunk
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        item_id: String,
        delta: String,
    },

    #[serde(rename = "response.audio.done")]
    AudioDone {
        #[serde(default)]
        item_id: String,
    },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        call_id: String,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },

    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        rate_limits: Vec<RateLimit>,
    },

    /// Filled in by the codec with the raw `type` of an [`Other`](Self::Other)
    #[serde(skip_deserializing)]
    Unknown(String),

    /// Any other `type`
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Best human-readable message from an `error` payload.
    pub fn error_message(error: &Value) -> String {
        error
            .get("message")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

/// Session information.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Response information.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: String,
    /// in_progress, completed, cancelled, failed or incomplete
    #[serde(default)]
    pub status: Option<String>,
}

/// One entry of a `rate_limits.updated` event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RateLimit {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub remaining: u64,
    #[serde(default)]
    pub reset_seconds: f64,
}
