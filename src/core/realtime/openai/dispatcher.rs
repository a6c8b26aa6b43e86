//! Routing of decoded server events to the response queue.
//!
//! The dispatcher is owned by the connection task and sees every inbound
//! frame in socket order. It keeps the only cross-frame state the protocol
//! needs: function-call arguments are streamed as deltas keyed by `call_id`
//! and must be stitched together before the call is handed to the consumer.

use std::collections::HashMap;
use std::sync::Arc;

use base64::prelude::*;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::codec;
use super::messages::ServerEvent;
use crate::core::realtime::base::{
    FunctionCallRequest, LifecycleEvent, RealtimeError, RealtimeEvent, TranscriptRole,
    TranscriptStage,
};
use crate::core::realtime::queue::{EventSender, PushOutcome};

/// A function call whose arguments are still streaming.
#[derive(Debug, Default)]
struct PendingFunctionCall {
    name: Option<String>,
    arguments: String,
}

/// Maps server events to consumer events.
pub struct EventDispatcher {
    events: EventSender,
    pending_calls: HashMap<String, PendingFunctionCall>,
    session_id: Arc<RwLock<Option<String>>>,
    forward_lifecycle: bool,
}

impl EventDispatcher {
    pub fn new(
        events: EventSender,
        session_id: Arc<RwLock<Option<String>>>,
        forward_lifecycle: bool,
    ) -> Self {
        Self {
            events,
            pending_calls: HashMap::new(),
            session_id,
            forward_lifecycle,
        }
    }

    /// Number of function calls whose arguments are still being assembled.
    pub fn pending_calls(&self) -> usize {
        self.pending_calls.len()
    }

    /// Decode and dispatch one text frame. Malformed frames are logged and
    /// skipped; they never end the connection.
    pub fn handle_frame(&mut self, text: &str) {
        match codec::decode(text) {
            Ok(event) => self.dispatch(event),
            Err(e) => tracing::warn!("Skipping inbound frame: {}", e),
        }
    }

    /// Dispatch one decoded server event.
    pub fn dispatch(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::AudioDelta { delta, .. } => match BASE64_STANDARD.decode(delta.as_bytes()) {
                Ok(audio) => self.emit(RealtimeEvent::AudioDelta(Bytes::from(audio))),
                Err(e) => tracing::warn!("Dropping undecodable audio delta: {}", e),
            },

            ServerEvent::TextDelta { delta, .. } => self.emit(RealtimeEvent::TextDelta(delta)),

            ServerEvent::AudioTranscriptDelta { delta, .. } => {
                self.emit(RealtimeEvent::Transcription {
                    text: delta,
                    role: TranscriptRole::Assistant,
                    stage: TranscriptStage::Partial,
                })
            }

            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                tracing::debug!("Assistant transcript: {}", transcript);
                self.emit(RealtimeEvent::Transcription {
                    text: transcript,
                    role: TranscriptRole::Assistant,
                    stage: TranscriptStage::Final,
                })
            }

            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                tracing::debug!("User transcript: {}", transcript);
                self.emit(RealtimeEvent::Transcription {
                    text: transcript,
                    role: TranscriptRole::User,
                    stage: TranscriptStage::Final,
                })
            }

            ServerEvent::TranscriptionFailed { item_id, error } => {
                let message = ServerEvent::error_message(&error);
                tracing::warn!(item_id = %item_id, "Input transcription failed: {}", message);
                self.emit(RealtimeEvent::Error {
                    message: format!("Transcription failed: {message}"),
                })
            }

            ServerEvent::OutputItemAdded { item, .. } => {
                if item.is_function_call()
                    && let Some(call_id) = item.call_id
                {
                    tracing::debug!(
                        "Tracking function call: call_id={}, name={:?}",
                        call_id,
                        item.name
                    );
                    let pending = self.pending_calls.entry(call_id).or_default();
                    if item.name.is_some() {
                        pending.name = item.name;
                    }
                }
            }

            ServerEvent::FunctionCallArgumentsDelta { call_id, delta } => {
                self.pending_calls
                    .entry(call_id)
                    .or_default()
                    .arguments
                    .push_str(&delta);
            }

            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => self.finish_function_call(call_id, name, arguments),

            ServerEvent::Error { error } => {
                let message = ServerEvent::error_message(&error);
                tracing::error!(
                    code = error.get("code").and_then(serde_json::Value::as_str).unwrap_or_default(),
                    "{}",
                    RealtimeError::ProviderError(message.clone())
                );
                self.emit(RealtimeEvent::Error { message })
            }

            ServerEvent::SessionCreated { session } => {
                tracing::info!("Realtime session created: {}", session.id);
                *self.session_id.write() = Some(session.id.clone());
                self.emit_lifecycle(LifecycleEvent::SessionCreated {
                    session_id: session.id,
                })
            }

            ServerEvent::SessionUpdated { .. } => {
                tracing::debug!("Realtime session updated");
                self.emit_lifecycle(LifecycleEvent::SessionUpdated)
            }

            ServerEvent::ResponseCreated { response } => {
                tracing::debug!("Response started: {}", response.id);
                self.emit_lifecycle(LifecycleEvent::ResponseStarted {
                    response_id: response.id,
                })
            }

            ServerEvent::ResponseDone { response } => {
                tracing::debug!("Response done: {} ({:?})", response.id, response.status);
                self.emit_lifecycle(LifecycleEvent::ResponseDone {
                    response_id: response.id,
                    status: response.status,
                })
            }

            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                tracing::debug!("Speech started at {}ms", audio_start_ms)
            }

            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                tracing::debug!("Speech stopped at {}ms", audio_end_ms)
            }

            ServerEvent::RateLimitsUpdated { rate_limits } => {
                for limit in rate_limits {
                    tracing::debug!(
                        name = %limit.name,
                        remaining = limit.remaining,
                        limit = limit.limit,
                        "Rate limit updated"
                    );
                }
            }

            ServerEvent::Unknown(event_type) => {
                tracing::trace!("Unrecognized server event: {}", event_type);
                self.emit(RealtimeEvent::Unknown(event_type))
            }

            ServerEvent::InputAudioBufferCommitted { .. }
            | ServerEvent::InputAudioBufferCleared
            | ServerEvent::ConversationItemCreated { .. }
            | ServerEvent::OutputItemDone { .. }
            | ServerEvent::ContentPartAdded { .. }
            | ServerEvent::ContentPartDone { .. }
            | ServerEvent::TextDone { .. }
            | ServerEvent::AudioDone { .. }
            | ServerEvent::Other => tracing::trace!("Bookkeeping server event"),
        }
    }

    fn finish_function_call(&mut self, call_id: String, name: Option<String>, arguments: String) {
        let pending = self.pending_calls.remove(&call_id).unwrap_or_default();
        let name = name
            .filter(|n| !n.is_empty())
            .or(pending.name)
            .unwrap_or_default();
        // The done event normally repeats the full argument string; the
        // accumulated deltas are the fallback.
        let raw = if arguments.is_empty() {
            pending.arguments
        } else {
            arguments
        };

        let arguments = match parse_arguments(&raw) {
            Ok(arguments) => arguments,
            Err(reason) => {
                let err = RealtimeError::ToolArgumentParse {
                    call_id: call_id.clone(),
                    reason,
                };
                tracing::warn!("{}; delivering empty arguments", err);
                Map::new()
            }
        };

        tracing::debug!("Function call ready: call_id={}, name={}", call_id, name);
        self.emit(RealtimeEvent::FunctionCall(FunctionCallRequest {
            call_id,
            name,
            arguments,
        }))
    }

    fn emit_lifecycle(&self, event: LifecycleEvent) {
        if self.forward_lifecycle {
            self.emit(RealtimeEvent::Lifecycle(event))
        }
    }

    fn emit(&self, event: RealtimeEvent) {
        if self.events.push(event) == PushOutcome::Closed {
            tracing::trace!("Event consumer gone, discarding");
        }
    }
}

/// Parse a streamed argument payload. Empty means "no arguments".
fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}
