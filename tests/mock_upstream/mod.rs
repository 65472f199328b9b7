//! Shared test doubles for the relay.
//!
//! - [`MockUpstream`]: an in-memory [`RealtimeUpstream`] whose event sequence
//!   is fed by the test through a [`MockHandle`]
//! - [`MockRealtimeServer`]: a tokio-tungstenite server speaking the OpenAI
//!   Realtime wire protocol from scripted replies

// Each test binary uses a different subset of these helpers
#![allow(dead_code)]

pub mod server;

pub use server::{MockBehavior, MockRealtimeServer, SessionReply};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, StreamExt, stream};
use parking_lot::Mutex;

use voice_relay::core::realtime::{
    AudioContent, ChunkStream, ContentEntry, InputAudioEvent, InputItem, MessageItem, OutputItem,
    RealtimeError, RealtimeResult, RealtimeUpstream, ResponseEvent, SessionOptions, TextContent,
    UpstreamEvent, UpstreamEvents,
};
use voice_relay::core::relay::{ClientFrame, OutboundFrame, RelayResult};

// =============================================================================
// In-memory upstream
// =============================================================================

/// Everything the relay asked of the upstream.
#[derive(Debug, Default)]
pub struct Recorded {
    pub configured: Vec<SessionOptions>,
    pub audio: Vec<Bytes>,
    pub items: Vec<InputItem>,
    pub responses_requested: usize,
    pub close_calls: usize,
}

pub struct MockUpstream {
    recorded: Arc<Mutex<Recorded>>,
    events: Option<UpstreamEvents>,
    configure_error: Option<RealtimeError>,
}

/// Test-side controls for a [`MockUpstream`].
pub struct MockHandle {
    pub recorded: Arc<Mutex<Recorded>>,
    events_tx: Option<mpsc::UnboundedSender<RealtimeResult<UpstreamEvent>>>,
}

impl MockUpstream {
    pub fn new() -> (Self, MockHandle) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (events_tx, events_rx) = mpsc::unbounded();
        (
            Self {
                recorded: recorded.clone(),
                events: Some(events_rx.boxed()),
                configure_error: None,
            },
            MockHandle {
                recorded,
                events_tx: Some(events_tx),
            },
        )
    }

    /// An upstream whose `configure` fails with `error`.
    pub fn failing_configure(error: RealtimeError) -> (Self, MockHandle) {
        let (mut upstream, handle) = Self::new();
        upstream.configure_error = Some(error);
        (upstream, handle)
    }
}

#[async_trait]
impl RealtimeUpstream for MockUpstream {
    async fn configure(&mut self, options: SessionOptions) -> RealtimeResult<()> {
        self.recorded.lock().configured.push(options);
        match self.configure_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn send_audio(&mut self, audio: Bytes) -> RealtimeResult<()> {
        self.recorded.lock().audio.push(audio);
        Ok(())
    }

    async fn send_item(&mut self, item: InputItem) -> RealtimeResult<()> {
        self.recorded.lock().items.push(item);
        Ok(())
    }

    async fn generate_response(&mut self) -> RealtimeResult<()> {
        self.recorded.lock().responses_requested += 1;
        Ok(())
    }

    fn events(&mut self) -> RealtimeResult<UpstreamEvents> {
        self.events
            .take()
            .ok_or_else(|| RealtimeError::SessionError("events already taken".to_string()))
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        self.recorded.lock().close_calls += 1;
        Ok(())
    }
}

impl MockHandle {
    pub fn push(&self, event: UpstreamEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.unbounded_send(Ok(event));
        }
    }

    pub fn fail(&self, error: RealtimeError) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.unbounded_send(Err(error));
        }
    }

    /// End the upstream event sequence.
    pub fn finish(&mut self) {
        self.events_tx = None;
    }

    pub fn close_calls(&self) -> usize {
        self.recorded.lock().close_calls
    }
}

// =============================================================================
// Event builders
// =============================================================================

pub fn chunks<T: Send + 'static>(items: Vec<T>) -> ChunkStream<T> {
    stream::iter(items.into_iter().map(Ok)).boxed()
}

pub fn text_chunks(deltas: &[&str]) -> ChunkStream<String> {
    chunks(deltas.iter().map(|d| d.to_string()).collect())
}

pub fn text_content(index: u32, deltas: &[&str]) -> ContentEntry {
    ContentEntry::Text(TextContent {
        index,
        chunks: text_chunks(deltas),
    })
}

pub fn audio_content(index: u32, frames: &[&'static [u8]], transcript: &[&str]) -> ContentEntry {
    ContentEntry::Audio(AudioContent {
        index,
        audio: chunks(frames.iter().copied().map(Bytes::from_static).collect()),
        transcript: text_chunks(transcript),
    })
}

pub fn message(item_id: &str, contents: Vec<ContentEntry>) -> OutputItem {
    OutputItem::Message(MessageItem {
        id: item_id.to_string(),
        contents: chunks(contents),
    })
}

pub fn response(id: &str, items: Vec<OutputItem>) -> UpstreamEvent {
    UpstreamEvent::Response(ResponseEvent {
        id: id.to_string(),
        items: chunks(items),
    })
}

pub fn input_audio(item_id: &str, transcript: Option<&str>) -> UpstreamEvent {
    let text = transcript.map(str::to_string);
    UpstreamEvent::InputAudio(InputAudioEvent {
        item_id: item_id.to_string(),
        completion: async move { Ok(text) }.boxed(),
    })
}

/// Input audio whose transcription resolves only when the sender fires.
pub fn pending_input_audio(item_id: &str) -> (UpstreamEvent, oneshot::Sender<Option<String>>) {
    let (tx, rx) = oneshot::channel();
    let event = UpstreamEvent::InputAudio(InputAudioEvent {
        item_id: item_id.to_string(),
        completion: async move {
            rx.await
                .map_err(|_| RealtimeError::ConnectionFailed("transcription dropped".to_string()))
        }
        .boxed(),
    });
    (event, tx)
}

// =============================================================================
// Client side helpers
// =============================================================================

pub type ClientInput = mpsc::UnboundedSender<RelayResult<ClientFrame>>;

pub fn client_input() -> (ClientInput, mpsc::UnboundedReceiver<RelayResult<ClientFrame>>) {
    mpsc::unbounded()
}

pub fn send_text(input: &ClientInput, raw: &str) {
    let _ = input.unbounded_send(Ok(ClientFrame::Text(raw.to_string())));
}

pub fn send_audio(input: &ClientInput, pcm: &'static [u8]) {
    let _ = input.unbounded_send(Ok(ClientFrame::Binary(Bytes::from_static(pcm))));
}

/// Next frame the relay queued for the client, or `None` after 2 s.
pub async fn next_frame(rx: &mut tokio::sync::mpsc::Receiver<OutboundFrame>) -> Option<OutboundFrame> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Next frame as JSON, panicking on audio or close frames.
pub async fn next_json(rx: &mut tokio::sync::mpsc::Receiver<OutboundFrame>) -> serde_json::Value {
    match next_frame(rx).await {
        Some(OutboundFrame::Message(message)) => {
            serde_json::from_str(&message.encode().unwrap()).unwrap()
        }
        other => panic!("expected a JSON message, got {other:?}"),
    }
}

/// Poll `check` until it holds or 2 s pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
