//! OpenAI Realtime API protocol and session client.
//!
//! # Layers
//!
//! - `messages` - serde envelopes for client and server events
//! - `codec` - JSON text frames to typed events and back
//! - `commands` - caller intents expanded into ordered wire events
//! - `dispatcher` - server events routed to the response queue
//! - `client` - connection lifecycle and the `BaseRealtime` implementation
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.
//! G.711 u-law and a-law are also supported at 8kHz.

mod client;
pub mod codec;
pub mod commands;
mod config;
pub mod dispatcher;
pub mod messages;

pub use client::{AudioAccumulation, OpenAIRealtime};
pub use commands::{FunctionOutcome, OutboundCommand, SessionSettings};
pub use config::{
    DEFAULT_REALTIME_MODEL, KNOWN_REALTIME_MODELS, Modality, OPENAI_BETA_HEADER,
    OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice, is_known_model,
};
pub use dispatcher::EventDispatcher;
pub use messages::{ClientEvent, ServerEvent};
