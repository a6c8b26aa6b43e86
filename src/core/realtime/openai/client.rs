//! OpenAI Realtime session client.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! # Tasks
//!
//! Each connection runs two tasks. The *connection task* owns the socket: it
//! writes outbound batches, answers pings and feeds inbound frames to the
//! [`EventDispatcher`]. The *supervisor* awaits the connection task, reports
//! how it ended through the response queue and drives the lifecycle into
//! `Closed`. Because the supervisor holds the last queue sender, the
//! consumer's stream ends right after the final error event.
//!
//! Start and close are serialized by an async transition lock; the state
//! itself sits behind a short synchronous lock so readers never wait on I/O.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use url::Url;

use super::codec;
use super::commands::{OutboundCommand, SessionSettings};
use super::config::{
    DEFAULT_REALTIME_MODEL, KNOWN_REALTIME_MODELS, OPENAI_BETA_HEADER, OPENAI_REALTIME_URL,
    OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice, is_known_model,
};
use super::dispatcher::EventDispatcher;
use crate::core::realtime::base::{
    BaseRealtime, ConnectionState, RealtimeConfig, RealtimeError, RealtimeEvent, RealtimeResult,
    ToolDefinition, TurnDetectionConfig,
};
use crate::core::realtime::bridge::{CommandSink, FunctionCallBridge};
use crate::core::realtime::queue::{self, EventSender, EventStream};

/// Channel capacity for outbound batches.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `close` waits for the connection task before aborting it.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for the best-effort close frame.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Lifecycle
// =============================================================================

/// How the connection task ended without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    /// `close` was called or the session was dropped
    Requested,
    /// The service closed the socket
    ServerClosed,
}

/// Handles owned by one live connection.
struct Link {
    outbound: mpsc::Sender<Vec<Message>>,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    state: ConnectionState,
    /// Bumped on every start so a late supervisor cannot touch a newer link
    generation: u64,
    link: Option<Link>,
}

impl Lifecycle {
    fn transition(&mut self, next: ConnectionState) -> RealtimeResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(RealtimeError::InternalError(format!(
                "illegal state transition {} -> {}",
                self.state, next
            )));
        }
        tracing::debug!("Session state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Move a connection of `generation` into `Closed` and release its link.
    fn finish(&mut self, generation: u64) -> Option<Link> {
        if self.generation != generation {
            return None;
        }
        if self.state == ConnectionState::Active {
            self.transition(ConnectionState::Closing).ok()?;
        }
        if self.state == ConnectionState::Closing {
            self.transition(ConnectionState::Closed).ok()?;
        }
        self.link.take()
    }

    /// Outbound channel of a healthy connection.
    fn outbound(&self) -> Option<mpsc::Sender<Vec<Message>>> {
        match (&self.state, &self.link) {
            (ConnectionState::Active, Some(link)) if !link.outbound.is_closed() => {
                Some(link.outbound.clone())
            }
            _ => None,
        }
    }
}

/// Audio appended since the last commit or clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioAccumulation {
    pub chunks: usize,
    pub bytes: usize,
}

impl AudioAccumulation {
    fn record(&mut self, bytes: usize) {
        self.chunks += 1;
        self.bytes += bytes;
    }

    fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

// =============================================================================
// OpenAI Realtime Client
// =============================================================================

/// OpenAI Realtime session.
///
/// All operations take `&self`; share it behind an `Arc` to drive it from
/// several tasks.
pub struct OpenAIRealtime {
    config: RwLock<RealtimeConfig>,
    endpoint: Url,
    voice: OpenAIRealtimeVoice,
    audio_format: OpenAIRealtimeAudioFormat,
    lifecycle: Arc<Mutex<Lifecycle>>,
    transition_lock: tokio::sync::Mutex<()>,
    events: Mutex<Option<EventStream>>,
    session_id: Arc<RwLock<Option<String>>>,
    audio: Mutex<AudioAccumulation>,
}

impl OpenAIRealtime {
    /// Validate `config` and build an idle session.
    pub fn new(mut config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        if config.model.is_empty() {
            config.model = DEFAULT_REALTIME_MODEL.to_string();
        } else if !is_known_model(&config.model) {
            tracing::warn!(
                "Unrecognized realtime model '{}', passing it through",
                config.model
            );
        }

        let voice = config
            .voice
            .as_deref()
            .map(str::parse::<OpenAIRealtimeVoice>)
            .transpose()?
            .unwrap_or_default();

        let audio_format = config
            .input_audio_format
            .as_deref()
            .map(str::parse::<OpenAIRealtimeAudioFormat>)
            .transpose()?
            .unwrap_or_default();
        if let Some(output) = config.output_audio_format.as_deref()
            && output.parse::<OpenAIRealtimeAudioFormat>()? != audio_format
        {
            return Err(RealtimeError::InvalidConfiguration(
                "input and output audio formats must match".to_string(),
            ));
        }

        if config.handshake_timeout.is_zero() {
            return Err(RealtimeError::InvalidConfiguration(
                "handshake timeout must be positive".to_string(),
            ));
        }
        if config.event_queue_capacity == 0 {
            return Err(RealtimeError::InvalidConfiguration(
                "event queue capacity must be positive".to_string(),
            ));
        }

        let endpoint = build_endpoint(&config.url, &config.model)?;

        Ok(Self {
            config: RwLock::new(config),
            endpoint,
            voice,
            audio_format,
            lifecycle: Arc::new(Mutex::new(Lifecycle::default())),
            transition_lock: tokio::sync::Mutex::new(()),
            events: Mutex::new(None),
            session_id: Arc::new(RwLock::new(None)),
            audio: Mutex::new(AudioAccumulation::default()),
        })
    }

    pub fn voice(&self) -> OpenAIRealtimeVoice {
        self.voice
    }

    pub fn audio_format(&self) -> OpenAIRealtimeAudioFormat {
        self.audio_format
    }

    /// WebSocket URL including the model query parameter.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Session ID reported by `session.created` on the current connection.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Audio appended since the last commit or clear.
    pub fn buffered_audio(&self) -> AudioAccumulation {
        *self.audio.lock()
    }

    /// Current session settings, including tools registered so far.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::from_config(&self.config.read(), self.voice, self.audio_format)
    }

    /// Serialize and transmit one command. The events it expands to are
    /// written back to back.
    pub async fn send(&self, command: OutboundCommand) -> RealtimeResult<()> {
        let outbound = self
            .lifecycle
            .lock()
            .outbound()
            .ok_or(RealtimeError::NotConnected)?;

        tracing::trace!("Sending {}", command.name());
        let frames = encode_command(command)?;
        outbound
            .send(frames)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    fn handshake_request(&self) -> RealtimeResult<http::Request<()>> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.read().api_key))
            .map_err(|_| {
                RealtimeError::AuthenticationFailed("API key is not a valid header value".into())
            })?;
        let headers = request.headers_mut();
        headers.insert(http::header::AUTHORIZATION, bearer);
        headers.insert("OpenAI-Beta", HeaderValue::from_static(OPENAI_BETA_HEADER));
        Ok(request)
    }

    async fn open_socket(&self, handshake_timeout: Duration) -> RealtimeResult<WsStream> {
        let request = self.handshake_request()?;
        match tokio::time::timeout(handshake_timeout, tokio_tungstenite::connect_async(request))
            .await
        {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(tungstenite::Error::Http(response))) => Err(RealtimeError::ConnectionFailed(
                format!("handshake rejected with HTTP {}", response.status()),
            )),
            Ok(Err(e)) => Err(RealtimeError::ConnectionFailed(e.to_string())),
            Err(_) => Err(RealtimeError::ConnectionFailed(format!(
                "handshake timed out after {}ms",
                handshake_timeout.as_millis()
            ))),
        }
    }

    /// Stop the live connection, if any, and wait for it to wind down.
    /// Callers hold the transition lock.
    async fn teardown(&self) {
        let (generation, link) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != ConnectionState::Active
                || lifecycle.transition(ConnectionState::Closing).is_err()
            {
                return;
            }
            (lifecycle.generation, lifecycle.link.take())
        };

        if let Some(link) = link {
            link.cancel.cancel();
            drop(link.outbound);
            let mut supervisor = link.supervisor;
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut supervisor)
                .await
                .is_err()
            {
                tracing::warn!("Connection task did not stop in time, aborting");
                supervisor.abort();
            }
        }

        drop(self.lifecycle.lock().finish(generation));
        self.audio.lock().take();
        tracing::info!("Realtime session closed");
    }
}

fn build_endpoint(url: &str, model: &str) -> RealtimeResult<Url> {
    let base = if url.is_empty() {
        OPENAI_REALTIME_URL
    } else {
        url
    };
    let mut endpoint = Url::parse(base).map_err(|e| {
        RealtimeError::InvalidConfiguration(format!("invalid realtime URL '{base}': {e}"))
    })?;
    if !matches!(endpoint.scheme(), "ws" | "wss") {
        return Err(RealtimeError::InvalidConfiguration(format!(
            "realtime URL must use ws or wss, got '{}'",
            endpoint.scheme()
        )));
    }
    endpoint.query_pairs_mut().append_pair("model", model);
    Ok(endpoint)
}

fn encode_command(command: OutboundCommand) -> RealtimeResult<Vec<Message>> {
    command
        .into_events()
        .iter()
        .map(codec::encode_message)
        .collect()
}

// =============================================================================
// Connection tasks
// =============================================================================

async fn supervise(
    generation: u64,
    lifecycle: Arc<Mutex<Lifecycle>>,
    events: EventSender,
    worker: AbortOnDropHandle<RealtimeResult<Shutdown>>,
) {
    match worker.await {
        Ok(Ok(Shutdown::Requested)) => tracing::debug!("Connection task finished"),
        Ok(Ok(Shutdown::ServerClosed)) => {
            tracing::warn!("Realtime connection closed by server");
            events.push(RealtimeEvent::Error {
                message: "Connection closed by server".to_string(),
            });
        }
        Ok(Err(e)) => {
            tracing::error!("Realtime connection failed: {}", e);
            events.push(RealtimeEvent::Error {
                message: e.to_string(),
            });
        }
        Err(e) => {
            tracing::error!("Connection task terminated abnormally: {}", e);
            events.push(RealtimeEvent::Error {
                message: format!("Connection task terminated: {e}"),
            });
        }
    }

    drop(lifecycle.lock().finish(generation));
    // Last sender: the consumer's stream ends here.
    drop(events);
}

async fn run_connection(
    ws: WsStream,
    initial: Vec<Message>,
    mut outbound: mpsc::Receiver<Vec<Message>>,
    mut dispatcher: EventDispatcher,
    cancel: CancellationToken,
) -> RealtimeResult<Shutdown> {
    let (mut sink, mut stream) = ws.split();
    write_batch(&mut sink, initial).await?;

    loop {
        if cancel.is_cancelled() {
            send_close(&mut sink).await;
            return Ok(Shutdown::Requested);
        }

        // Unbiased: a busy writer must not starve reads.
        tokio::select! {
            _ = cancel.cancelled() => {
                send_close(&mut sink).await;
                return Ok(Shutdown::Requested);
            }

            batch = outbound.recv() => match batch {
                Some(frames) => write_batch(&mut sink, frames).await?,
                None => {
                    send_close(&mut sink).await;
                    return Ok(Shutdown::Requested);
                }
            },

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatcher.handle_frame(&text),
                Some(Ok(Message::Ping(payload))) => sink
                    .send(Message::Pong(payload))
                    .await
                    .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?,
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!("Ignoring {}-byte binary frame", data.len())
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed by server: {:?}", frame);
                    return Ok(Shutdown::ServerClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(RealtimeError::WebSocketError(e.to_string())),
                None => return Ok(Shutdown::ServerClosed),
            },
        }
    }
}

async fn write_batch<S>(sink: &mut S, frames: Vec<Message>) -> RealtimeResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    for frame in frames {
        sink.feed(frame)
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;
    }
    sink.flush()
        .await
        .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
}

async fn send_close<S>(sink: &mut S)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, sink.send(Message::Close(None))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Close frame not delivered: {}", e),
        Err(_) => tracing::debug!("Close frame timed out"),
    }
}

// =============================================================================
// Trait implementations
// =============================================================================

#[async_trait]
impl BaseRealtime for OpenAIRealtime {
    async fn start(&self) -> RealtimeResult<()> {
        let _transition = self.transition_lock.lock().await;

        if self.lifecycle.lock().outbound().is_some() {
            tracing::debug!("Realtime session already active");
            return Ok(());
        }
        // A connection that died on its own may still be winding down.
        self.teardown().await;

        let (handshake_timeout, capacity, forward_lifecycle) = {
            let config = self.config.read();
            (
                config.handshake_timeout,
                config.event_queue_capacity,
                config.forward_lifecycle,
            )
        };
        let initial = encode_command(OutboundCommand::SessionConfigure(self.session_settings()))?;

        let generation = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.transition(ConnectionState::Connecting)?;
            lifecycle.generation += 1;
            lifecycle.generation
        };

        let ws = match self.open_socket(handshake_timeout).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::error!("Failed to connect to realtime API: {}", e);
                self.lifecycle.lock().transition(ConnectionState::Closed)?;
                return Err(e);
            }
        };
        tracing::info!("Connected to realtime API at {}", self.endpoint);

        *self.session_id.write() = None;
        self.audio.lock().take();

        let (events_tx, events_rx) = queue::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(WS_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let dispatcher =
            EventDispatcher::new(events_tx.clone(), self.session_id.clone(), forward_lifecycle);
        let worker = tokio::spawn(run_connection(
            ws,
            initial,
            outbound_rx,
            dispatcher,
            cancel.clone(),
        ));

        {
            // The supervisor finalizes under this lock, so it cannot observe
            // the link before it is fully installed.
            let mut lifecycle = self.lifecycle.lock();
            let supervisor = tokio::spawn(supervise(
                generation,
                self.lifecycle.clone(),
                events_tx,
                AbortOnDropHandle::new(worker),
            ));
            lifecycle.link = Some(Link {
                outbound: outbound_tx,
                cancel,
                supervisor,
            });
            lifecycle.transition(ConnectionState::Active)?;
        }

        *self.events.lock() = Some(events_rx);
        Ok(())
    }

    async fn close(&self) -> RealtimeResult<()> {
        let _transition = self.transition_lock.lock().await;
        self.teardown().await;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.lifecycle.lock().outbound().is_some()
    }

    fn connection_state(&self) -> ConnectionState {
        self.lifecycle.lock().state
    }

    fn take_events(&self) -> Option<EventStream> {
        self.events.lock().take()
    }

    async fn send_audio(&self, audio_data: Bytes) -> RealtimeResult<()> {
        let len = audio_data.len();
        self.send(OutboundCommand::AudioAppend(audio_data)).await?;
        self.audio.lock().record(len);
        Ok(())
    }

    async fn commit_audio(&self) -> RealtimeResult<()> {
        self.send(OutboundCommand::AudioCommitAndRespond).await?;
        let turn = self.audio.lock().take();
        tracing::debug!(
            "Committed {} audio chunks ({} bytes, ~{}ms)",
            turn.chunks,
            turn.bytes,
            self.audio_format.duration_ms(turn.bytes)
        );
        Ok(())
    }

    async fn clear_audio_buffer(&self) -> RealtimeResult<()> {
        self.send(OutboundCommand::AudioClear).await?;
        self.audio.lock().take();
        Ok(())
    }

    async fn send_text(&self, text: &str) -> RealtimeResult<()> {
        self.send(OutboundCommand::TextMessage(text.to_string()))
            .await
    }

    async fn cancel_response(&self) -> RealtimeResult<()> {
        self.send(OutboundCommand::ResponseCancel).await
    }

    async fn configure_tools(&self, tools: Vec<ToolDefinition>) -> RealtimeResult<()> {
        let count = tools.len();
        self.config.write().tools = tools;
        match self
            .send(OutboundCommand::SessionConfigure(self.session_settings()))
            .await
        {
            Err(RealtimeError::NotConnected) => {
                tracing::debug!("Stored {} tools; applied on next start", count);
                Ok(())
            }
            other => other,
        }
    }

    async fn update_instructions(&self, instructions: &str) -> RealtimeResult<()> {
        self.config.write().instructions = Some(instructions.to_string());
        match self
            .send(OutboundCommand::InstructionUpdate(instructions.to_string()))
            .await
        {
            Err(RealtimeError::NotConnected) => {
                tracing::debug!("Stored instructions; applied on next start");
                Ok(())
            }
            other => other,
        }
    }

    async fn submit_function_result(
        &self,
        call_id: &str,
        outcome: Result<serde_json::Value, String>,
    ) -> RealtimeResult<()> {
        FunctionCallBridge::new(self).submit(call_id, outcome).await
    }

    fn get_provider_info(&self) -> serde_json::Value {
        let config = self.config.read();
        let tools: Vec<&str> = config.tools.iter().map(|t| t.name.as_str()).collect();
        let voices: Vec<&str> = OpenAIRealtimeVoice::ALL.iter().map(|v| v.as_str()).collect();
        let server_vad = matches!(
            config.turn_detection,
            None | Some(TurnDetectionConfig::ServerVad { .. })
        );
        serde_json::json!({
            "provider": "openai",
            "api_type": "WebSocket Realtime",
            "endpoint": self.endpoint.as_str(),
            "model": config.model,
            "voice": self.voice.as_str(),
            "audio_format": self.audio_format.as_str(),
            "sample_rate": self.audio_format.sample_rate(),
            "tools": tools,
            "state": self.connection_state().to_string(),
            "session_id": self.session_id(),
            "supported_models": KNOWN_REALTIME_MODELS,
            "supported_voices": voices,
            "supported_audio_formats": ["pcm16", "g711_ulaw", "g711_alaw"],
            "features": {
                "bidirectional_audio": true,
                "function_calling": true,
                "transcription": config.input_audio_transcription.is_some(),
                "server_vad": server_vad,
            },
        })
    }
}

#[async_trait]
impl CommandSink for OpenAIRealtime {
    async fn send_command(&self, command: OutboundCommand) -> RealtimeResult<()> {
        self.send(command).await
    }
}

impl Drop for OpenAIRealtime {
    fn drop(&mut self) {
        // Stops the connection task even if `close` was never awaited.
        if let Some(link) = self.lifecycle.lock().link.as_ref() {
            link.cancel.cancel();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
