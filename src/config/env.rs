use std::env;
use std::error::Error;
use std::str::FromStr;

use super::EngineConfig;

/// Read a variable, treating blank values as unset.
fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| format!("Invalid {name} value '{raw}': {e}"))
        })
        .transpose()
}

fn parse_bool(name: &str) -> Result<Option<bool>, String> {
    var(name)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(format!("Invalid {name} value '{raw}': expected true or false")),
        })
        .transpose()
}

/// Build a configuration from environment variables over the defaults.
/// No validation happens here.
pub(super) fn load() -> Result<EngineConfig, Box<dyn Error>> {
    let mut config = EngineConfig::default();

    if let Some(key) = var("OPENAI_API_KEY") {
        config.openai_api_key = key;
    }
    if let Some(url) = var("REALTIME_URL") {
        config.realtime_url = url;
    }
    if let Some(model) = var("REALTIME_MODEL") {
        config.model = model;
    }
    config.voice = var("REALTIME_VOICE");
    config.instructions = var("REALTIME_INSTRUCTIONS");
    config.audio_format = var("REALTIME_AUDIO_FORMAT");
    config.transcription_model = var("REALTIME_TRANSCRIPTION_MODEL");

    if let Some(ms) = parse::<u64>("REALTIME_HANDSHAKE_TIMEOUT_MS")? {
        config.handshake_timeout_ms = ms;
    }
    if let Some(capacity) = parse::<usize>("REALTIME_EVENT_QUEUE_CAPACITY")? {
        config.event_queue_capacity = capacity;
    }
    if let Some(forward) = parse_bool("REALTIME_FORWARD_LIFECYCLE")? {
        config.forward_lifecycle = forward;
    }

    Ok(config)
}
