pub mod realtime;

pub use realtime::{
    BaseRealtime, EventStream, FunctionCallBridge, OpenAIRealtime, RealtimeConfig, RealtimeError,
    RealtimeEvent, RealtimeResult,
};
