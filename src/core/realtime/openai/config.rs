//! Endpoint constants and the typed session options of the OpenAI Realtime API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::realtime::base::RealtimeError;

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Model requested when none is configured.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// Beta header value required by the service.
pub const OPENAI_BETA_HEADER: &str = "realtime=v1";

/// Models the service is known to accept. Others are passed through with a
/// warning since new snapshots appear regularly.
pub const KNOWN_REALTIME_MODELS: &[&str] = &[
    "gpt-4o-realtime-preview",
    "gpt-4o-realtime-preview-2024-10-01",
    "gpt-4o-realtime-preview-2024-12-17",
    "gpt-4o-mini-realtime-preview",
    "gpt-4o-mini-realtime-preview-2024-12-17",
];

/// Whether `model` is one of [`KNOWN_REALTIME_MODELS`].
pub fn is_known_model(model: &str) -> bool {
    KNOWN_REALTIME_MODELS.contains(&model)
}

// =============================================================================
// Voices
// =============================================================================

/// Voices available for spoken replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl OpenAIRealtimeVoice {
    /// All voices, in the order the service documents them.
    pub const ALL: [OpenAIRealtimeVoice; 8] = [
        Self::Alloy,
        Self::Ash,
        Self::Ballad,
        Self::Coral,
        Self::Echo,
        Self::Sage,
        Self::Shimmer,
        Self::Verse,
    ];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }
}

impl FromStr for OpenAIRealtimeVoice {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|voice| voice.as_str() == wanted)
            .ok_or_else(|| RealtimeError::InvalidConfiguration(format!("unknown voice '{s}'")))
    }
}

impl fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Audio Formats
// =============================================================================

/// Wire encodings for input and output audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeAudioFormat {
    /// PCM 16-bit signed little-endian, 24kHz mono
    #[default]
    #[serde(rename = "pcm16")]
    Pcm16,
    /// G.711 u-law, 8kHz
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// G.711 a-law, 8kHz
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

impl OpenAIRealtimeAudioFormat {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Pcm16 => 24000,
            Self::G711Ulaw | Self::G711Alaw => 8000,
        }
    }

    #[inline]
    pub fn bytes_per_sample(&self) -> u32 {
        match self {
            Self::Pcm16 => 2,
            Self::G711Ulaw | Self::G711Alaw => 1,
        }
    }

    /// Playback length of `bytes` of mono audio in this format.
    pub fn duration_ms(&self, bytes: usize) -> u64 {
        let bytes_per_second = u64::from(self.sample_rate() * self.bytes_per_sample());
        (bytes as u64).saturating_mul(1000) / bytes_per_second
    }
}

impl FromStr for OpenAIRealtimeAudioFormat {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm16" | "pcm" | "linear16" => Ok(Self::Pcm16),
            "g711_ulaw" | "ulaw" | "mulaw" => Ok(Self::G711Ulaw),
            "g711_alaw" | "alaw" => Ok(Self::G711Alaw),
            _ => Err(RealtimeError::InvalidConfiguration(format!(
                "unknown audio format '{s}'"
            ))),
        }
    }
}

impl fmt::Display for OpenAIRealtimeAudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Modalities
// =============================================================================

/// Response modalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

impl Modality {
    /// Spoken reply with a text rendition alongside.
    pub const TEXT_AND_AUDIO: [Modality; 2] = [Modality::Text, Modality::Audio];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }
}
