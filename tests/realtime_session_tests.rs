//! End-to-end session tests against the in-process mock realtime server

mod mock_providers;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use devvoice_engine::core::realtime::{
    BaseRealtime, ConnectionState, EventStream, FunctionCallBridge, FunctionOutcome,
    InputTranscriptionConfig, LifecycleEvent, OpenAIRealtime, RealtimeConfig, RealtimeError, RealtimeEvent,
    ToolDefinition, ToolExecutor, TranscriptRole, TranscriptStage,
};
use mock_providers::MockRealtimeServer;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn config_for(server: &MockRealtimeServer) -> RealtimeConfig {
    RealtimeConfig {
        api_key: "sk-test".to_string(),
        url: server.url(),
        ..Default::default()
    }
}

async fn connect(server: &MockRealtimeServer, config: RealtimeConfig) -> (OpenAIRealtime, EventStream) {
    let session = OpenAIRealtime::new(config).unwrap();
    session.start().await.unwrap();
    let events = session.take_events().unwrap();
    server.wait_for_connection().await;
    (session, events)
}

async fn next_event(events: &mut EventStream) -> Option<RealtimeEvent> {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
}

/// Next event that is not a lifecycle marker
async fn next_content(events: &mut EventStream) -> Option<RealtimeEvent> {
    loop {
        match next_event(events).await {
            Some(RealtimeEvent::Lifecycle(_)) => continue,
            other => return other,
        }
    }
}

async fn wait_for_state(session: &OpenAIRealtime, state: ConnectionState) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while session.connection_state() != state {
        assert!(
            tokio::time::Instant::now() < deadline,
            "stuck in {}",
            session.connection_state()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct TestRunner;

#[async_trait]
impl ToolExecutor for TestRunner {
    async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> FunctionOutcome {
        match name {
            "run_tests" => Ok(json!({"passed": 12, "filter": arguments.get("filter")})),
            other => Err(format!("unknown tool {other}")),
        }
    }
}

#[tokio::test]
async fn test_handshake_and_initial_session_update() {
    let server = MockRealtimeServer::start().await;
    let mut config = config_for(&server);
    config.forward_lifecycle = true;
    config.instructions = Some("Be terse".to_string());
    config.tools = vec![ToolDefinition::new(
        "run_tests",
        "Run the test suite",
        json!({"type": "object", "properties": {"filter": {"type": "string"}}}),
    )];

    let (session, mut events) = connect(&server, config).await;
    assert!(session.is_ready());
    assert_eq!(session.connection_state(), ConnectionState::Active);

    let handshake = &server.handshakes()[0];
    assert_eq!(handshake.authorization.as_deref(), Some("Bearer sk-test"));
    assert_eq!(handshake.beta.as_deref(), Some("realtime=v1"));
    assert!(handshake.uri.ends_with("model=gpt-4o-realtime-preview"));

    let frames = server.wait_for_frames(1).await;
    assert_eq!(frames[0]["type"], "session.update");
    let session_config = &frames[0]["session"];
    assert_eq!(session_config["instructions"], "Be terse");
    assert_eq!(session_config["voice"], "alloy");
    assert_eq!(session_config["input_audio_format"], "pcm16");
    assert_eq!(session_config["tools"][0]["type"], "function");
    assert_eq!(session_config["tools"][0]["name"], "run_tests");

    assert_eq!(
        next_event(&mut events).await,
        Some(RealtimeEvent::Lifecycle(LifecycleEvent::SessionCreated {
            session_id: "sess-1".to_string()
        }))
    );
    assert_eq!(session.session_id().as_deref(), Some("sess-1"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let server = MockRealtimeServer::start().await;
    let (session, _events) = connect(&server, config_for(&server)).await;

    session.start().await.unwrap();
    session.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.frame_types(), ["session.update"]);
    // The stream was handed out once per connection
    assert!(session.take_events().is_none());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_double_close() {
    let server = MockRealtimeServer::start().await;
    let (session, mut events) = connect(&server, config_for(&server)).await;

    let (first, second) = tokio::join!(session.close(), session.close());
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(session.connection_state(), ConnectionState::Closed);
    assert!(!session.is_ready());

    // A client-initiated close ends the stream without an error
    assert_eq!(next_event(&mut events).await, None);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_send_before_start_is_rejected() {
    let server = MockRealtimeServer::start().await;
    let session = OpenAIRealtime::new(config_for(&server)).unwrap();

    assert!(matches!(
        session.send_audio(Bytes::from_static(&[0; 32])).await,
        Err(RealtimeError::NotConnected)
    ));
    assert!(matches!(
        session.commit_audio().await,
        Err(RealtimeError::NotConnected)
    ));
    assert!(matches!(
        session.submit_function_result("call_1", Ok(json!(1))).await,
        Err(RealtimeError::NotConnected)
    ));
    assert!(session.take_events().is_none());
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_commit_sequencing() {
    let server = MockRealtimeServer::start().await;
    let (session, _events) = connect(&server, config_for(&server)).await;

    session.send_audio(Bytes::from_static(&[1, 2, 3, 4])).await.unwrap();
    session.send_audio(Bytes::from_static(&[5, 6])).await.unwrap();
    let buffered = session.buffered_audio();
    assert_eq!((buffered.chunks, buffered.bytes), (2, 6));

    session.commit_audio().await.unwrap();
    assert_eq!(session.buffered_audio().chunks, 0);

    let frames = server.wait_for_frames(5).await;
    assert_eq!(
        server.frame_types(),
        [
            "session.update",
            "input_audio_buffer.append",
            "input_audio_buffer.append",
            "input_audio_buffer.commit",
            "response.create",
        ]
    );
    let first_chunk = BASE64_STANDARD
        .decode(frames[1]["audio"].as_str().unwrap())
        .unwrap();
    assert_eq!(first_chunk, [1, 2, 3, 4]);
    assert_eq!(
        frames[4]["response"]["modalities"],
        json!(["text", "audio"])
    );

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_commit_without_audio_is_still_sent() {
    let server = MockRealtimeServer::start().await;
    let (session, _events) = connect(&server, config_for(&server)).await;

    session.commit_audio().await.unwrap();
    server.wait_for_frames(3).await;
    assert_eq!(
        server.frame_types(),
        ["session.update", "input_audio_buffer.commit", "response.create"]
    );

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_text_clear_cancel_and_updates() {
    let server = MockRealtimeServer::start().await;
    let (session, _events) = connect(&server, config_for(&server)).await;

    session.send_audio(Bytes::from_static(&[0; 8])).await.unwrap();
    session.clear_audio_buffer().await.unwrap();
    assert_eq!(session.buffered_audio().bytes, 0);

    session.send_text("what changed?").await.unwrap();
    session.cancel_response().await.unwrap();
    session.update_instructions("Answer in one line").await.unwrap();
    session
        .configure_tools(vec![ToolDefinition::new(
            "git_status",
            "Show working tree status",
            json!({"type": "object"}),
        )])
        .await
        .unwrap();

    let frames = server.wait_for_frames(8).await;
    assert_eq!(
        server.frame_types(),
        [
            "session.update",
            "input_audio_buffer.append",
            "input_audio_buffer.clear",
            "conversation.item.create",
            "response.create",
            "response.cancel",
            "session.update",
            "session.update",
        ]
    );
    assert_eq!(frames[3]["item"]["role"], "user");
    assert_eq!(frames[3]["item"]["content"][0]["text"], "what changed?");
    assert_eq!(frames[6]["session"]["instructions"], "Answer in one line");
    assert!(frames[6]["session"].get("tools").is_none());
    assert_eq!(frames[7]["session"]["tools"][0]["name"], "git_status");
    assert_eq!(frames[7]["session"]["instructions"], "Answer in one line");

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_function_call_assembly_from_deltas() {
    let server = MockRealtimeServer::start().await;
    let (session, mut events) = connect(&server, config_for(&server)).await;

    server.push(json!({
        "type": "response.output_item.added",
        "response_id": "resp_1",
        "item": {"id": "item_1", "type": "function_call", "call_id": "call_1", "name": "run_tests"}
    }));
    server.push(json!({"type": "response.function_call_arguments.delta", "call_id": "call_1", "delta": "{\"a\":"}));
    server.push(json!({"type": "response.function_call_arguments.delta", "call_id": "call_1", "delta": "1}"}));
    server.push(json!({"type": "response.function_call_arguments.done", "call_id": "call_1", "arguments": ""}));

    let Some(RealtimeEvent::FunctionCall(request)) = next_content(&mut events).await else {
        panic!("expected a function call");
    };
    assert_eq!(request.call_id, "call_1");
    assert_eq!(request.name, "run_tests");
    assert_eq!(Value::Object(request.arguments), json!({"a": 1}));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_function_call_with_empty_or_invalid_arguments() {
    let server = MockRealtimeServer::start().await;
    let (session, mut events) = connect(&server, config_for(&server)).await;

    server.push(json!({"type": "response.function_call_arguments.done", "call_id": "call_e", "name": "git_status", "arguments": ""}));
    server.push(json!({"type": "response.function_call_arguments.done", "call_id": "call_x", "name": "git_status", "arguments": "{broken"}));

    for expected in ["call_e", "call_x"] {
        let Some(RealtimeEvent::FunctionCall(request)) = next_content(&mut events).await else {
            panic!("expected a function call");
        };
        assert_eq!(request.call_id, expected);
        assert!(request.arguments.is_empty());
    }

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_backpressure_drops_deltas_but_keeps_control_events() {
    let server = MockRealtimeServer::start().await;
    let mut config = config_for(&server);
    config.event_queue_capacity = 2;
    let (session, mut events) = connect(&server, config).await;

    for i in 0..50 {
        server.push(json!({"type": "response.text.delta", "delta": format!("d{i}")}));
    }
    server.push(json!({"type": "error", "error": {"message": "sentinel"}}));
    // Let the read loop run ahead of the consumer
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut deltas = 0u64;
    loop {
        match next_content(&mut events).await {
            Some(RealtimeEvent::TextDelta(_)) => deltas += 1,
            Some(RealtimeEvent::Error { message }) => {
                assert_eq!(message, "sentinel");
                break;
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    assert!(events.dropped() > 0);
    assert_eq!(deltas + events.dropped(), 50);
    // The read loop kept going
    assert!(session.is_ready());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_and_malformed_frames_do_not_stop_the_stream() {
    let server = MockRealtimeServer::start().await;
    let (session, mut events) = connect(&server, config_for(&server)).await;

    server.push_raw("this is not json");
    server.push(json!({"no_type": true}));
    server.push(json!({"type": "conversation.brand_new_event", "payload": 1}));
    server.push(json!({"type": "response.text.delta", "delta": "still here"}));

    assert_eq!(
        next_content(&mut events).await,
        Some(RealtimeEvent::Unknown("conversation.brand_new_event".to_string()))
    );
    assert_eq!(
        next_content(&mut events).await,
        Some(RealtimeEvent::TextDelta("still here".to_string()))
    );

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_error_without_message() {
    let server = MockRealtimeServer::start().await;
    let (session, mut events) = connect(&server, config_for(&server)).await;

    server.push(json!({"type": "error", "error": {"type": "invalid_request_error"}}));
    assert_eq!(
        next_content(&mut events).await,
        Some(RealtimeEvent::Error {
            message: "Unknown error".to_string()
        })
    );
    // Provider errors leave the connection up
    assert!(session.is_ready());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_default_session_delivers_no_lifecycle_events() {
    let server = MockRealtimeServer::start().await;
    let config = config_for(&server);
    assert!(!config.forward_lifecycle);
    let (session, mut events) = connect(&server, config).await;

    server.push(json!({"type": "session.updated", "session": {"id": "sess-1"}}));
    server.push(json!({"type": "response.created", "response": {"id": "resp_1"}}));
    server.push(json!({"type": "response.text.delta", "delta": "hi"}));
    server.push(json!({"type": "response.done", "response": {"id": "resp_1", "status": "completed"}}));
    server.push(json!({"type": "error", "error": {"message": "end marker"}}));

    // session.created was the first frame on the wire
    assert_eq!(
        next_event(&mut events).await,
        Some(RealtimeEvent::TextDelta("hi".to_string()))
    );
    assert_eq!(
        next_event(&mut events).await,
        Some(RealtimeEvent::Error {
            message: "end marker".to_string()
        })
    );
    assert!(events.try_recv().is_none());
    // Still tracked even when not forwarded
    assert_eq!(session.session_id().as_deref(), Some("sess-1"));

    session.close().await.unwrap();
    assert_eq!(next_event(&mut events).await, None);
}

#[tokio::test]
async fn test_server_drop_ends_stream_and_allows_restart() {
    let server = MockRealtimeServer::start().await;
    let mut config = config_for(&server);
    config.forward_lifecycle = true;
    let (session, mut events) = connect(&server, config).await;

    server.drop_connection();

    assert!(matches!(
        next_content(&mut events).await,
        Some(RealtimeEvent::Error { .. })
    ));
    assert_eq!(next_event(&mut events).await, None);
    wait_for_state(&session, ConnectionState::Closed).await;
    assert!(!session.is_ready());
    assert!(matches!(
        session.send_audio(Bytes::from_static(&[0; 4])).await,
        Err(RealtimeError::NotConnected)
    ));

    session.start().await.unwrap();
    let mut events = session.take_events().unwrap();
    server.wait_for_frames(2).await;
    assert_eq!(server.connection_count(), 2);
    assert_eq!(
        next_event(&mut events).await,
        Some(RealtimeEvent::Lifecycle(LifecycleEvent::SessionCreated {
            session_id: "sess-2".to_string()
        }))
    );
    assert_eq!(session.session_id().as_deref(), Some("sess-2"));
    session.send_audio(Bytes::from_static(&[0; 4])).await.unwrap();

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_server_close_frame_reports_error() {
    let server = MockRealtimeServer::start().await;
    let (session, mut events) = connect(&server, config_for(&server)).await;

    server.close_connection();

    assert_eq!(
        next_content(&mut events).await,
        Some(RealtimeEvent::Error {
            message: "Connection closed by server".to_string()
        })
    );
    assert_eq!(next_event(&mut events).await, None);
    wait_for_state(&session, ConnectionState::Closed).await;

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_handshake_rejected() {
    let server = MockRealtimeServer::start().await;
    server.reject_with(401);
    let session = OpenAIRealtime::new(config_for(&server)).unwrap();

    match session.start().await {
        Err(RealtimeError::ConnectionFailed(message)) => assert!(message.contains("401")),
        other => panic!("expected a rejected handshake, got {other:?}"),
    }
    assert_eq!(session.connection_state(), ConnectionState::Closed);
    assert!(session.take_events().is_none());
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = OpenAIRealtime::new(RealtimeConfig {
        api_key: "sk-test".to_string(),
        url: format!("ws://{addr}/v1/realtime"),
        ..Default::default()
    })
    .unwrap();

    assert!(matches!(
        session.start().await,
        Err(RealtimeError::ConnectionFailed(_))
    ));
    assert!(!session.is_ready());
}

#[tokio::test]
async fn test_handshake_timeout() {
    // Accepts TCP connections but never answers the upgrade
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hold = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let session = OpenAIRealtime::new(RealtimeConfig {
        api_key: "sk-test".to_string(),
        url: format!("ws://{addr}/v1/realtime"),
        handshake_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .unwrap();

    match session.start().await {
        Err(RealtimeError::ConnectionFailed(message)) => assert!(message.contains("timed out")),
        other => panic!("expected a handshake timeout, got {other:?}"),
    }
    assert_eq!(session.connection_state(), ConnectionState::Closed);

    hold.abort();
}

#[tokio::test]
async fn test_full_voice_turn_with_tool_call() {
    let server = MockRealtimeServer::start().await;
    let mut config = config_for(&server);
    // The turn below is delimited by response.done
    config.forward_lifecycle = true;
    config.input_audio_transcription = Some(InputTranscriptionConfig {
        model: "whisper-1".to_string(),
    });
    config.tools = vec![ToolDefinition::new(
        "run_tests",
        "Run the test suite",
        json!({"type": "object"}),
    )];
    let (session, mut events) = connect(&server, config).await;

    session.send_audio(Bytes::from(vec![0u8; 4800])).await.unwrap();
    session.commit_audio().await.unwrap();
    server.wait_for_frames(4).await;

    let speech = BASE64_STANDARD.encode([9u8, 8, 7]);
    for frame in [
        json!({"type": "input_audio_buffer.committed", "item_id": "item_u"}),
        json!({"type": "conversation.item.input_audio_transcription.completed", "item_id": "item_u", "content_index": 0, "transcript": "run the unit tests"}),
        json!({"type": "response.created", "response": {"id": "resp_1", "status": "in_progress"}}),
        json!({"type": "response.audio.delta", "item_id": "item_a", "delta": speech}),
        json!({"type": "response.audio_transcript.delta", "item_id": "item_a", "delta": "Running"}),
        json!({"type": "response.audio_transcript.done", "item_id": "item_a", "transcript": "Running them now"}),
        json!({"type": "response.output_item.added", "response_id": "resp_1", "item": {"type": "function_call", "call_id": "call_9", "name": "run_tests"}}),
        json!({"type": "response.function_call_arguments.delta", "call_id": "call_9", "delta": "{\"filter\":\"unit\"}"}),
        json!({"type": "response.function_call_arguments.done", "call_id": "call_9", "name": "run_tests", "arguments": "{\"filter\":\"unit\"}"}),
        json!({"type": "response.done", "response": {"id": "resp_1", "status": "completed"}}),
    ] {
        server.push(frame);
    }

    let mut received = Vec::new();
    loop {
        let event = next_event(&mut events).await.expect("stream ended early");
        let done = matches!(
            event,
            RealtimeEvent::Lifecycle(LifecycleEvent::ResponseDone { .. })
        );
        received.push(event);
        if done {
            break;
        }
    }

    assert!(received.contains(&RealtimeEvent::Transcription {
        text: "run the unit tests".to_string(),
        role: TranscriptRole::User,
        stage: TranscriptStage::Final,
    }));
    assert!(received.contains(&RealtimeEvent::AudioDelta(Bytes::from_static(&[9, 8, 7]))));
    assert!(received.contains(&RealtimeEvent::Transcription {
        text: "Running them now".to_string(),
        role: TranscriptRole::Assistant,
        stage: TranscriptStage::Final,
    }));

    let request = received
        .iter()
        .find_map(|event| match event {
            RealtimeEvent::FunctionCall(request) => Some(request.clone()),
            _ => None,
        })
        .expect("function call delivered");
    assert_eq!(request.arguments.get("filter"), Some(&json!("unit")));

    FunctionCallBridge::new(&session)
        .handle(&request, &TestRunner)
        .await
        .unwrap();

    let frames = server.wait_for_frames(6).await;
    assert_eq!(frames[4]["type"], "conversation.item.create");
    assert_eq!(frames[4]["item"]["type"], "function_call_output");
    assert_eq!(frames[4]["item"]["call_id"], "call_9");
    let output: Value = serde_json::from_str(frames[4]["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(output, json!({"passed": 12, "filter": "unit"}));
    assert_eq!(frames[5]["type"], "response.create");

    session.close().await.unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Closed);

    // Queue closes exactly once, with no trailing error
    while let Some(event) = next_event(&mut events).await {
        assert!(!matches!(event, RealtimeEvent::Error { .. }), "{event:?}");
    }
    assert_eq!(events.recv().await, None);
}

#[tokio::test]
async fn test_tool_round_trip_resumes_generation() {
    let server = MockRealtimeServer::start().await;
    let (session, mut events) = connect(&server, config_for(&server)).await;
    server.wait_for_frames(1).await;

    session
        .configure_tools(vec![ToolDefinition::new(
            "toolX",
            "Report service status",
            json!({"type": "object", "properties": {"q": {"type": "string"}}}),
        )])
        .await
        .unwrap();
    session.send_audio(Bytes::from(vec![1u8; 960])).await.unwrap();
    session.send_audio(Bytes::from(vec![2u8; 960])).await.unwrap();
    session.commit_audio().await.unwrap();

    let frames = server.wait_for_frames(6).await;
    assert_eq!(
        server.frame_types(),
        [
            "session.update",
            "session.update",
            "input_audio_buffer.append",
            "input_audio_buffer.append",
            "input_audio_buffer.commit",
            "response.create",
        ]
    );
    assert_eq!(frames[1]["session"]["tools"][0]["name"], "toolX");
    assert_eq!(frames[2]["audio"], BASE64_STANDARD.encode([1u8; 960]));
    assert_eq!(frames[3]["audio"], BASE64_STANDARD.encode([2u8; 960]));

    server.push(json!({
        "type": "response.function_call_arguments.done",
        "call_id": "c1",
        "name": "toolX",
        "arguments": "{\"q\":\"status\"}"
    }));
    let Some(RealtimeEvent::FunctionCall(request)) = next_event(&mut events).await else {
        panic!("expected a function call");
    };
    assert_eq!(request.call_id, "c1");
    assert_eq!(request.name, "toolX");
    assert_eq!(request.arguments.get("q"), Some(&json!("status")));

    FunctionCallBridge::new(&session)
        .submit("c1", Ok(json!({"ok": true})))
        .await
        .unwrap();

    let frames = server.wait_for_frames(8).await;
    assert_eq!(frames[6]["type"], "conversation.item.create");
    assert_eq!(frames[6]["item"]["type"], "function_call_output");
    assert_eq!(frames[6]["item"]["call_id"], "c1");
    let output: Value = serde_json::from_str(frames[6]["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(output, json!({"ok": true}));
    assert_eq!(frames[7]["type"], "response.create");

    // Generation resumes after the bundled response.create
    server.push(json!({"type": "response.text.delta", "delta": "All "}));
    server.push(json!({"type": "response.text.delta", "delta": "systems go"}));
    let mut text = String::new();
    while text != "All systems go" {
        match next_event(&mut events).await {
            Some(RealtimeEvent::TextDelta(delta)) => text.push_str(&delta),
            other => panic!("unexpected {other:?}"),
        }
    }

    session.close().await.unwrap();
    assert_eq!(events.recv().await, None);
}

#[tokio::test]
async fn test_reads_progress_while_audio_floods_outbound() {
    let server = MockRealtimeServer::start().await;
    let (session, mut events) = connect(&server, config_for(&server)).await;
    let session = Arc::new(session);

    let stop = Arc::new(AtomicBool::new(false));
    let flooder = {
        let session = session.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let chunk = Bytes::from(vec![0u8; 4800]);
            let mut sent = 0usize;
            while !stop.load(Ordering::SeqCst) {
                session.send_audio(chunk.clone()).await.unwrap();
                sent += 1;
            }
            sent
        })
    };
    server.wait_for_frames(50).await;

    server.push(json!({"type": "response.text.delta", "delta": "heard you"}));
    assert_eq!(
        next_event(&mut events).await,
        Some(RealtimeEvent::TextDelta("heard you".to_string()))
    );
    // The delta was read while appends were still streaming out
    assert!(!flooder.is_finished());

    stop.store(true, Ordering::SeqCst);
    let sent = flooder.await.unwrap();
    assert!(sent >= 49);
    assert_eq!(session.buffered_audio().chunks, sent);

    session.close().await.unwrap();
}
