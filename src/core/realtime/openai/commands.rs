//! Outbound commands and their expansion into wire events.
//!
//! A command is what a caller asks for; it may take more than one wire event
//! to express. [`OutboundCommand::into_events`] returns them in the order the
//! service must see them, and the connection task writes the whole batch
//! without interleaving anything else.

use bytes::Bytes;
use serde_json::Value;

use super::config::{Modality, OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice};
use super::messages::{
    ClientEvent, ConversationItem, InputAudioTranscription, ResponseConfig, SessionConfig, ToolDef,
};
use crate::core::realtime::base::{
    InputTranscriptionConfig, RealtimeConfig, ToolDefinition, TurnDetectionConfig,
};

/// Outcome of a tool invocation: a JSON result or an error message.
pub type FunctionOutcome = Result<Value, String>;

/// Full session configuration sent once per connection and again whenever
/// the tool list changes.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub model: String,
    pub instructions: Option<String>,
    pub voice: OpenAIRealtimeVoice,
    pub audio_format: OpenAIRealtimeAudioFormat,
    pub transcription: Option<InputTranscriptionConfig>,
    pub turn_detection: Option<TurnDetectionConfig>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<String>,
    pub temperature: Option<f32>,
}

impl SessionSettings {
    /// Build from a session configuration and its already-validated typed
    /// options.
    pub fn from_config(
        config: &RealtimeConfig,
        voice: OpenAIRealtimeVoice,
        audio_format: OpenAIRealtimeAudioFormat,
    ) -> Self {
        Self {
            model: config.model.clone(),
            instructions: config.instructions.clone(),
            voice,
            audio_format,
            transcription: config.input_audio_transcription.clone(),
            turn_detection: config.turn_detection.clone(),
            tools: config.tools.clone(),
            tool_choice: config.tool_choice.clone(),
            temperature: config.temperature,
        }
    }

    fn to_session_config(&self) -> SessionConfig {
        let turn_detection = self.turn_detection.as_ref().map(|td| match td {
            TurnDetectionConfig::None => Value::Null,
            vad => serde_json::to_value(vad).unwrap_or(Value::Null),
        });

        SessionConfig {
            model: Some(self.model.clone()),
            modalities: Some(modalities()),
            instructions: self.instructions.clone(),
            voice: Some(self.voice.as_str().to_string()),
            input_audio_format: Some(self.audio_format.as_str().to_string()),
            output_audio_format: Some(self.audio_format.as_str().to_string()),
            input_audio_transcription: self.transcription.as_ref().map(|t| {
                InputAudioTranscription {
                    model: t.model.clone(),
                }
            }),
            turn_detection,
            // Always present so an empty list clears previously registered tools.
            tools: Some(
                self.tools
                    .iter()
                    .map(|t| ToolDef::function(t.name.clone(), t.description.clone(), t.parameters.clone()))
                    .collect(),
            ),
            tool_choice: self.tool_choice.clone(),
            temperature: self.temperature,
        }
    }
}

fn modalities() -> Vec<String> {
    Modality::TEXT_AND_AUDIO
        .iter()
        .map(|m| m.as_str().to_string())
        .collect()
}

fn response_create() -> ClientEvent {
    ClientEvent::ResponseCreate {
        response: Some(ResponseConfig {
            modalities: Some(modalities()),
            instructions: None,
        }),
    }
}

/// Something the caller wants the service to do.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    /// Full session configuration
    SessionConfigure(SessionSettings),
    /// One raw audio chunk; never requests a response
    AudioAppend(Bytes),
    /// End the user turn and ask for a reply
    AudioCommitAndRespond,
    /// Discard uncommitted audio
    AudioClear,
    /// User text message followed by a reply request
    TextMessage(String),
    /// Tool result followed by a reply request
    FunctionResultSubmit {
        call_id: String,
        outcome: FunctionOutcome,
    },
    /// New system instructions, nothing else
    InstructionUpdate(String),
    /// Stop the in-flight response
    ResponseCancel,
}

impl OutboundCommand {
    /// Tool result for `call_id`.
    pub fn function_result(call_id: impl Into<String>, outcome: FunctionOutcome) -> Self {
        Self::FunctionResultSubmit {
            call_id: call_id.into(),
            outcome,
        }
    }

    /// Expand into the ordered wire events that express this command.
    pub fn into_events(self) -> Vec<ClientEvent> {
        match self {
            OutboundCommand::SessionConfigure(settings) => vec![ClientEvent::SessionUpdate {
                session: settings.to_session_config(),
            }],
            OutboundCommand::AudioAppend(audio) => vec![ClientEvent::audio_append(&audio)],
            OutboundCommand::AudioCommitAndRespond => {
                vec![ClientEvent::InputAudioBufferCommit, response_create()]
            }
            OutboundCommand::AudioClear => vec![ClientEvent::InputAudioBufferClear],
            OutboundCommand::TextMessage(text) => vec![
                ClientEvent::ConversationItemCreate {
                    item: ConversationItem::user_text(text),
                    previous_item_id: None,
                },
                response_create(),
            ],
            OutboundCommand::FunctionResultSubmit { call_id, outcome } => vec![
                ClientEvent::ConversationItemCreate {
                    item: ConversationItem::function_call_output(
                        call_id,
                        function_output(&outcome),
                    ),
                    previous_item_id: None,
                },
                response_create(),
            ],
            OutboundCommand::InstructionUpdate(instructions) => vec![ClientEvent::SessionUpdate {
                session: SessionConfig {
                    instructions: Some(instructions),
                    ..Default::default()
                },
            }],
            OutboundCommand::ResponseCancel => vec![ClientEvent::ResponseCancel],
        }
    }

    /// Short label used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundCommand::SessionConfigure(_) => "session_configure",
            OutboundCommand::AudioAppend(_) => "audio_append",
            OutboundCommand::AudioCommitAndRespond => "audio_commit_and_respond",
            OutboundCommand::AudioClear => "audio_clear",
            OutboundCommand::TextMessage(_) => "text_message",
            OutboundCommand::FunctionResultSubmit { .. } => "function_result_submit",
            OutboundCommand::InstructionUpdate(_) => "instruction_update",
            OutboundCommand::ResponseCancel => "response_cancel",
        }
    }
}

/// `output` string of a `function_call_output` item.
pub fn function_output(outcome: &FunctionOutcome) -> String {
    match outcome {
        Ok(value) => value.to_string(),
        Err(message) => format!("Error: {message}"),
    }
}
