//! Realtime voice session module.
//!
//! A session owns one WebSocket to the OpenAI Realtime API at a time. Audio,
//! tool results and configuration go out through typed commands; everything
//! the service says comes back as [`RealtimeEvent`]s on an [`EventStream`].
//!
//! # Architecture
//!
//! - `BaseRealtime` trait for the session surface
//! - `openai` for the wire protocol and the connection tasks
//! - `queue` for the response queue with lossy deltas and lossless control
//! - `bridge` for routing tool outcomes back into the session
//!
//! # Example
//!
//! ```rust,ignore
//! use devvoice_engine::core::realtime::{
//!     BaseRealtime, FunctionCallBridge, NoToolExecutor, OpenAIRealtime, RealtimeConfig,
//!     RealtimeEvent,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = Arc::new(OpenAIRealtime::new(RealtimeConfig {
//!         api_key: "sk-...".to_string(),
//!         ..Default::default()
//!     })?);
//!     session.start().await?;
//!     let mut events = session.take_events().expect("fresh connection");
//!     let bridge = FunctionCallBridge::new(session.clone());
//!
//!     session.send_audio(audio_bytes).await?;
//!     session.commit_audio().await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let RealtimeEvent::FunctionCall(call) = event {
//!             bridge.handle(&call, &NoToolExecutor).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod base;
pub mod bridge;
pub mod openai;
pub mod queue;

pub use base::{
    BaseRealtime, ConnectionState, DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT,
    FunctionCallRequest, InputTranscriptionConfig, LifecycleEvent, RealtimeConfig, RealtimeError,
    RealtimeEvent, RealtimeResult, ToolDefinition, TranscriptRole, TranscriptStage,
    TurnDetectionConfig,
};
pub use bridge::{CommandSink, FunctionCallBridge, NoToolExecutor, ToolExecutor};
pub use openai::{
    AudioAccumulation, DEFAULT_REALTIME_MODEL, FunctionOutcome, Modality, OPENAI_REALTIME_URL,
    OpenAIRealtime, OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice, OutboundCommand,
};
pub use queue::{EventSender, EventStream, PushOutcome};
