//! Translation between wire frames and typed events.
//!
//! Decoding goes through a generic JSON value first so a frame with an
//! unrecognized `type` is reported as [`ServerEvent::Unknown`] rather than a
//! decode failure, and a frame without a `type` at all is rejected with
//! [`RealtimeError::MalformedEvent`].

use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use super::messages::{ClientEvent, ServerEvent};
use crate::core::realtime::base::{RealtimeError, RealtimeResult};

/// Serialize one client event to its JSON text.
pub fn encode(event: &ClientEvent) -> RealtimeResult<String> {
    serde_json::to_string(event).map_err(|e| {
        RealtimeError::SerializationError(format!("{}: {}", event.event_type(), e))
    })
}

/// Serialize one client event to a WebSocket text frame.
pub fn encode_message(event: &ClientEvent) -> RealtimeResult<Message> {
    encode(event).map(|json| Message::Text(json.into()))
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> RealtimeResult<ServerEvent> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RealtimeError::MalformedEvent(format!("invalid JSON: {e}")))?;

    let event_type = match value.get("type") {
        Some(Value::String(event_type)) => event_type.clone(),
        Some(_) => {
            return Err(RealtimeError::MalformedEvent(
                "`type` is not a string".to_string(),
            ));
        }
        None => {
            return Err(RealtimeError::MalformedEvent(
                "missing `type` field".to_string(),
            ));
        }
    };

    match serde_json::from_value::<ServerEvent>(value) {
        Ok(ServerEvent::Other) => Ok(ServerEvent::Unknown(event_type)),
        Ok(event) => Ok(event),
        Err(e) => Err(RealtimeError::MalformedEvent(format!("{event_type}: {e}"))),
    }
}
