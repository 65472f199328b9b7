//! Scripted OpenAI Realtime WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Reply to `session.update`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionReply {
    #[default]
    Ack,
    Error,
    Silent,
}

/// What the server sends back, per client event.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub session_reply: SessionReply,
    /// Sent after each `response.create`
    pub on_response_create: Vec<Value>,
    /// Sent once, after the first `input_audio_buffer.append`
    pub on_first_audio: Vec<Value>,
    /// Close the socket after replying to `response.create`
    pub close_after_response: bool,
}

#[derive(Debug, Default)]
pub struct MockServerState {
    pub received: Mutex<Vec<Value>>,
    pub authorization: Mutex<Option<String>>,
    pub beta_header: Mutex<Option<String>>,
    pub request_uri: Mutex<Option<String>>,
    pub connections: AtomicUsize,
}

impl MockServerState {
    pub fn received_types(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|v| v["type"].as_str().map(str::to_string))
            .collect()
    }
}

pub struct MockRealtimeServer {
    pub addr: SocketAddr,
    pub state: Arc<MockServerState>,
    task: JoinHandle<()>,
}

impl MockRealtimeServer {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockServerState::default());
        let behavior = Arc::new(behavior);

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                let behavior = behavior.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state, behavior).await;
                });
            }
        });

        Self { addr, state, task }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }
}

impl Drop for MockRealtimeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockServerState>,
    behavior: Arc<MockBehavior>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handshake_state = state.clone();
    let ws_stream = accept_hdr_async(
        stream,
        move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let header = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            *handshake_state.authorization.lock() = header("authorization");
            *handshake_state.beta_header.lock() = header("openai-beta");
            *handshake_state.request_uri.lock() = Some(request.uri().to_string());
            Ok(response)
        },
    )
    .await?;
    state.connections.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws_stream.split();
    write
        .send(text(json!({
            "type": "session.created",
            "session": {"id": "sess_mock", "model": "gpt-4o-realtime-preview"}
        })))
        .await?;

    let mut audio_seen = false;
    while let Some(message) = read.next().await {
        let raw = match message? {
            Message::Text(raw) => raw,
            Message::Close(_) => break,
            _ => continue,
        };
        let value: Value = serde_json::from_str(raw.as_str())?;
        let kind = value["type"].as_str().unwrap_or_default().to_string();
        state.received.lock().push(value);

        let replies = match kind.as_str() {
            "session.update" => match behavior.session_reply {
                SessionReply::Ack => vec![json!({
                    "type": "session.updated",
                    "session": {"id": "sess_mock"}
                })],
                SessionReply::Error => vec![json!({
                    "type": "error",
                    "error": {
                        "type": "invalid_request_error",
                        "code": "invalid_value",
                        "message": "Invalid voice"
                    }
                })],
                SessionReply::Silent => Vec::new(),
            },
            "response.create" => behavior.on_response_create.clone(),
            "input_audio_buffer.append" if !audio_seen => {
                audio_seen = true;
                behavior.on_first_audio.clone()
            }
            _ => Vec::new(),
        };

        for reply in replies {
            write.send(text(reply)).await?;
        }

        if kind == "response.create" && behavior.close_after_response {
            write.send(Message::Close(None)).await?;
            break;
        }
    }

    Ok(())
}

fn text(value: Value) -> Message {
    Message::Text(value.to_string().into())
}

// =============================================================================
// Scripts
// =============================================================================

/// A complete text-only response.
pub fn text_response_script(response_id: &str, item_id: &str, deltas: &[&str]) -> Vec<Value> {
    let mut script = vec![
        json!({"type": "response.created", "response": {"id": response_id, "status": "in_progress"}}),
        json!({
            "type": "response.output_item.added",
            "response_id": response_id,
            "output_index": 0,
            "item": {"id": item_id, "type": "message", "role": "assistant", "content": []}
        }),
        json!({
            "type": "response.content_part.added",
            "response_id": response_id,
            "item_id": item_id,
            "output_index": 0,
            "content_index": 0,
            "part": {"type": "text", "text": ""}
        }),
    ];
    for delta in deltas {
        script.push(json!({
            "type": "response.text.delta",
            "item_id": item_id,
            "content_index": 0,
            "delta": delta
        }));
    }
    script.extend(close_message_script(response_id, item_id, &["response.text.done"]));
    script
}

/// A complete audio response with transcript.
pub fn audio_response_script(
    response_id: &str,
    item_id: &str,
    frames: &[&[u8]],
    transcript: &[&str],
) -> Vec<Value> {
    let mut script = vec![
        json!({"type": "response.created", "response": {"id": response_id}}),
        json!({
            "type": "response.output_item.added",
            "response_id": response_id,
            "item": {"id": item_id, "type": "message", "role": "assistant"}
        }),
        json!({
            "type": "response.content_part.added",
            "response_id": response_id,
            "item_id": item_id,
            "content_index": 0,
            "part": {"type": "audio", "transcript": ""}
        }),
    ];
    for frame in frames {
        script.push(json!({
            "type": "response.audio.delta",
            "item_id": item_id,
            "content_index": 0,
            "delta": BASE64_STANDARD.encode(frame)
        }));
    }
    for delta in transcript {
        script.push(json!({
            "type": "response.audio_transcript.delta",
            "item_id": item_id,
            "content_index": 0,
            "delta": delta
        }));
    }
    script.extend(close_message_script(
        response_id,
        item_id,
        &["response.audio.done", "response.audio_transcript.done"],
    ));
    script
}

fn close_message_script(response_id: &str, item_id: &str, done_types: &[&str]) -> Vec<Value> {
    let mut script: Vec<Value> = done_types
        .iter()
        .map(|kind| json!({"type": kind, "item_id": item_id, "content_index": 0}))
        .collect();
    script.push(json!({
        "type": "response.content_part.done",
        "response_id": response_id,
        "item_id": item_id,
        "content_index": 0
    }));
    script.push(json!({
        "type": "response.output_item.done",
        "response_id": response_id,
        "item": {"id": item_id, "type": "message"}
    }));
    script.push(json!({"type": "response.done", "response": {"id": response_id, "status": "completed"}}));
    script
}

/// Speech detection followed by a finished transcription.
pub fn speech_script(item_id: &str, transcript: &str) -> Vec<Value> {
    vec![
        json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 120, "item_id": item_id}),
        json!({"type": "input_audio_buffer.speech_stopped", "audio_end_ms": 900, "item_id": item_id}),
        json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": item_id,
            "content_index": 0,
            "transcript": transcript
        }),
    ]
}
