use url::Url;

use crate::core::realtime::{OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice};

pub fn validate_api_key(api_key: &str) -> Result<(), String> {
    if api_key.trim().is_empty() {
        return Err(
            "OpenAI API key is required (set OPENAI_API_KEY or openai.api_key)".to_string(),
        );
    }
    Ok(())
}

/// An empty URL selects the public endpoint.
pub fn validate_realtime_url(url: &str) -> Result<(), String> {
    if url.is_empty() {
        return Ok(());
    }
    let parsed = Url::parse(url).map_err(|e| format!("Invalid realtime URL '{url}': {e}"))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!(
            "Realtime URL must use ws:// or wss://, got '{other}://'"
        )),
    }
}

pub fn validate_engine_limits(handshake_timeout_ms: u64, event_queue_capacity: usize) -> Result<(), String> {
    if handshake_timeout_ms == 0 {
        return Err("Handshake timeout must be greater than zero".to_string());
    }
    if event_queue_capacity == 0 {
        return Err("Event queue capacity must be greater than zero".to_string());
    }
    Ok(())
}

pub fn validate_session_options(
    voice: Option<&str>,
    audio_format: Option<&str>,
) -> Result<(), String> {
    if let Some(voice) = voice {
        voice
            .parse::<OpenAIRealtimeVoice>()
            .map_err(|e| e.to_string())?;
    }
    if let Some(format) = audio_format {
        format
            .parse::<OpenAIRealtimeAudioFormat>()
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}
