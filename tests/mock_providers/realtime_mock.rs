//! Scriptable mock of the OpenAI Realtime WebSocket endpoint
//!
//! Records the handshake and every client frame, and lets a test push
//! arbitrary server frames or drop the connection at any point.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Handshake details captured from the client
#[derive(Debug, Clone)]
pub struct Handshake {
    pub uri: String,
    pub authorization: Option<String>,
    pub beta: Option<String>,
}

enum ServerAction {
    Frame(String),
    Close,
    Drop,
}

#[derive(Default)]
struct MockState {
    connections: AtomicUsize,
    handshakes: Mutex<Vec<Handshake>>,
    frames: Mutex<Vec<Value>>,
    current: Mutex<Option<(usize, mpsc::UnboundedSender<ServerAction>)>>,
    reject_status: Mutex<Option<u16>>,
    greet: bool,
}

/// In-process realtime server bound to a random local port
pub struct MockRealtimeServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    accept_task: JoinHandle<()>,
}

impl MockRealtimeServer {
    /// Start a server that greets each connection with `session.created`.
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    /// Start a server that stays silent until a test pushes frames.
    pub async fn start_silent() -> Self {
        Self::start_with(false).await
    }

    async fn start_with(greet: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            greet,
            ..Default::default()
        });

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// `ws://` URL of this server
    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    /// Completed WebSocket handshakes so far
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.state.handshakes.lock().clone()
    }

    /// Reject subsequent handshakes with this HTTP status.
    pub fn reject_with(&self, status: u16) {
        *self.state.reject_status.lock() = Some(status);
    }

    /// Every JSON frame received from clients, in arrival order
    pub fn frames(&self) -> Vec<Value> {
        self.state.frames.lock().clone()
    }

    /// `type` of every received frame
    pub fn frame_types(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|frame| frame["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Wait until at least `count` frames arrived, or panic after 5s.
    pub async fn wait_for_frames(&self, count: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let frames = self.frames();
            if frames.len() >= count {
                return frames;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "expected {count} frames, got {}: {:?}",
                    frames.len(),
                    self.frame_types()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until a connection is live and can accept pushed frames.
    pub async fn wait_for_connection(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.state.current.lock().is_none() {
            if tokio::time::Instant::now() >= deadline {
                panic!("no client connected");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Send a server event to the current connection.
    pub fn push(&self, event: Value) {
        self.push_raw(event.to_string());
    }

    /// Send a raw text frame, valid JSON or not.
    pub fn push_raw(&self, text: impl Into<String>) {
        self.act(ServerAction::Frame(text.into()));
    }

    /// Close the current connection with a close frame.
    pub fn close_connection(&self) {
        self.act(ServerAction::Close);
    }

    /// Drop the current TCP connection without a close handshake.
    pub fn drop_connection(&self) {
        self.act(ServerAction::Drop);
    }

    fn act(&self, action: ServerAction) {
        let current = self.state.current.lock();
        let (_, sender) = current.as_ref().expect("no live connection");
        let _ = sender.send(action);
    }
}

impl Drop for MockRealtimeServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let callback_state = state.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        callback_state.handshakes.lock().push(Handshake {
            uri: request.uri().to_string(),
            authorization: header("authorization"),
            beta: header("openai-beta"),
        });

        if let Some(status) = *callback_state.reject_status.lock() {
            let rejection = http::Response::builder()
                .status(status)
                .body(Some("rejected".to_string()))
                .unwrap();
            return Err(rejection);
        }
        Ok(response)
    };

    let ws_stream = accept_hdr_async(stream, callback).await?;
    let (mut write, mut read) = ws_stream.split();

    let conn_id = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let (action_tx, mut action_rx) = mpsc::unbounded_channel();
    *state.current.lock() = Some((conn_id, action_tx));

    if state.greet {
        let created = json!({
            "type": "session.created",
            "event_id": format!("evt-created-{conn_id}"),
            "session": { "id": format!("sess-{conn_id}"), "model": "gpt-4o-realtime-preview" }
        });
        write.send(Message::Text(created.to_string().into())).await?;
    }

    loop {
        tokio::select! {
            action = action_rx.recv() => match action {
                Some(ServerAction::Frame(text)) => {
                    write.send(Message::Text(text.into())).await?;
                }
                Some(ServerAction::Close) => {
                    write.send(Message::Close(None)).await?;
                    break;
                }
                Some(ServerAction::Drop) | None => break,
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        state.frames.lock().push(value);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    let mut current = state.current.lock();
    if matches!(current.as_ref(), Some((id, _)) if *id == conn_id) {
        *current = None;
    }
    Ok(())
}
