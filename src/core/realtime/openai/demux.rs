//! Rebuilds the nested event hierarchy from the flat OpenAI event feed.
//!
//! The socket task calls [`EventDemux::handle`] for every decoded server
//! event. Each open response, item and content part owns a channel whose
//! receiving half was handed out as a [`ChunkStream`]; `*.added` events open
//! channels, deltas push into them, and `*.done` events drop the senders so
//! the consumer sees the end of the stream.

use std::collections::HashMap;

use base64::prelude::*;
use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::messages::{ContentPart, ServerEvent};
use crate::core::realtime::base::{RealtimeError, RealtimeResult};
use crate::core::realtime::events::{
    AudioContent, ChunkStream, ContentEntry, InputAudioEvent, MessageItem, OutputItem,
    ResponseEvent, TextContent, UpstreamEvent, UpstreamEvents,
};

type ChunkSender<T> = mpsc::UnboundedSender<RealtimeResult<T>>;
type TranscriptionSender = oneshot::Sender<RealtimeResult<Option<String>>>;

/// Create a channel whose receiving half is exposed as a boxed stream.
pub(crate) fn chunk_channel<T: Send + 'static>() -> (ChunkSender<T>, ChunkStream<T>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield chunk;
        }
    };
    (tx, stream.boxed())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ContentKey {
    item_id: String,
    index: u32,
}

impl ContentKey {
    fn new(item_id: &str, index: u32) -> Self {
        Self {
            item_id: item_id.to_string(),
            index,
        }
    }
}

struct ItemRoute {
    response_id: String,
    contents: ChunkSender<ContentEntry>,
}

pub(crate) struct EventDemux {
    events: Option<ChunkSender<UpstreamEvent>>,
    session_ack: Option<oneshot::Sender<RealtimeResult<()>>>,
    responses: HashMap<String, ChunkSender<OutputItem>>,
    items: HashMap<String, ItemRoute>,
    texts: HashMap<ContentKey, ChunkSender<String>>,
    audio: HashMap<ContentKey, ChunkSender<Bytes>>,
    transcripts: HashMap<ContentKey, ChunkSender<String>>,
    pending_input: HashMap<String, TranscriptionSender>,
}

impl EventDemux {
    pub(crate) fn new() -> (Self, UpstreamEvents) {
        let (events, stream) = chunk_channel();
        let demux = Self {
            events: Some(events),
            session_ack: None,
            responses: HashMap::new(),
            items: HashMap::new(),
            texts: HashMap::new(),
            audio: HashMap::new(),
            transcripts: HashMap::new(),
            pending_input: HashMap::new(),
        };
        (demux, stream)
    }

    /// Resolve `ack` on the next `session.updated` (or `error`) event.
    pub(crate) fn expect_session_update(&mut self, ack: oneshot::Sender<RealtimeResult<()>>) {
        if let Some(previous) = self.session_ack.replace(ack) {
            let _ = previous.send(Err(RealtimeError::SessionError(
                "superseded by a newer session update".to_string(),
            )));
        }
    }

    pub(crate) fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { session } => {
                debug!("OpenAI Realtime session created: {}", session.id);
            }
            ServerEvent::SessionUpdated { session } => {
                debug!("OpenAI Realtime session updated: {}", session.id);
                if let Some(ack) = self.session_ack.take() {
                    let _ = ack.send(Ok(()));
                }
            }
            ServerEvent::Error { error } => {
                if let Some(ack) = self.session_ack.take() {
                    let _ = ack.send(Err(RealtimeError::ProviderError(error.to_string())));
                } else {
                    warn!("OpenAI Realtime error event: {}", error);
                }
            }

            ServerEvent::SpeechStarted { item_id, .. } => self.open_input_audio(item_id),
            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
                ..
            } => self.complete_input_audio(&item_id, Some(transcript)),
            ServerEvent::TranscriptionFailed { item_id, error, .. } => {
                warn!("Input audio transcription failed for {}: {}", item_id, error);
                self.complete_input_audio(&item_id, None);
            }

            ServerEvent::ResponseCreated { response } => self.open_response(response.id),
            ServerEvent::ResponseDone { response } => self.close_response(&response.id),

            ServerEvent::OutputItemAdded {
                response_id, item, ..
            } => {
                let item_id = item.id.unwrap_or_default();
                self.open_item(&response_id, item_id, item.item_type);
            }
            ServerEvent::OutputItemDone { item, .. } => {
                if let Some(item_id) = item.id {
                    self.close_item(&item_id);
                }
            }

            ServerEvent::ContentPartAdded {
                item_id,
                content_index,
                part,
                ..
            } => self.open_content(&item_id, content_index, part),
            ServerEvent::ContentPartDone {
                item_id,
                content_index,
                ..
            } => {
                let key = ContentKey::new(&item_id, content_index);
                self.texts.remove(&key);
                self.audio.remove(&key);
                self.transcripts.remove(&key);
            }

            ServerEvent::TextDelta {
                item_id,
                content_index,
                delta,
            } => push(&self.texts, &ContentKey::new(&item_id, content_index), Ok(delta)),
            ServerEvent::TextDone {
                item_id,
                content_index,
            } => {
                self.texts.remove(&ContentKey::new(&item_id, content_index));
            }

            ServerEvent::AudioTranscriptDelta {
                item_id,
                content_index,
                delta,
            } => push(
                &self.transcripts,
                &ContentKey::new(&item_id, content_index),
                Ok(delta),
            ),
            ServerEvent::AudioTranscriptDone {
                item_id,
                content_index,
            } => {
                self.transcripts
                    .remove(&ContentKey::new(&item_id, content_index));
            }

            ServerEvent::AudioDelta {
                item_id,
                content_index,
                delta,
            } => {
                let chunk = BASE64_STANDARD
                    .decode(delta.as_bytes())
                    .map(Bytes::from)
                    .map_err(|e| {
                        RealtimeError::SerializationError(format!("Invalid audio delta: {e}"))
                    });
                push(&self.audio, &ContentKey::new(&item_id, content_index), chunk);
            }
            ServerEvent::AudioDone {
                item_id,
                content_index,
            } => {
                self.audio.remove(&ContentKey::new(&item_id, content_index));
            }

            ServerEvent::Other => {}
        }
    }

    /// Deliver `error` to every stream and waiter that is still open, then
    /// end the top-level event sequence.
    pub(crate) fn fail(&mut self, error: RealtimeError) {
        if let Some(ack) = self.session_ack.take() {
            let _ = ack.send(Err(error.clone()));
        }
        for (_, tx) in self.pending_input.drain() {
            let _ = tx.send(Err(error.clone()));
        }
        for (_, tx) in self.texts.drain() {
            let _ = tx.send(Err(error.clone()));
        }
        for (_, tx) in self.transcripts.drain() {
            let _ = tx.send(Err(error.clone()));
        }
        for (_, tx) in self.audio.drain() {
            let _ = tx.send(Err(error.clone()));
        }
        for (_, route) in self.items.drain() {
            let _ = route.contents.send(Err(error.clone()));
        }
        for (_, tx) in self.responses.drain() {
            let _ = tx.send(Err(error.clone()));
        }
        if let Some(events) = self.events.take() {
            let _ = events.send(Err(error));
        }
    }

    // =========================================================================
    // Routing helpers
    // =========================================================================

    fn emit(&mut self, event: UpstreamEvent) {
        let delivered = self
            .events
            .as_ref()
            .is_some_and(|events| events.send(Ok(event)).is_ok());
        if !delivered {
            debug!("Upstream event dropped: event stream is not being consumed");
        }
    }

    fn open_input_audio(&mut self, item_id: String) {
        if self.pending_input.contains_key(&item_id) {
            debug!("Duplicate speech_started for {}", item_id);
            return;
        }

        let (tx, rx) = oneshot::channel();
        self.pending_input.insert(item_id.clone(), tx);

        let completion = async move {
            rx.await.unwrap_or_else(|_| {
                Err(RealtimeError::ConnectionFailed(
                    "connection closed before transcription completed".to_string(),
                ))
            })
        }
        .boxed();

        self.emit(UpstreamEvent::InputAudio(InputAudioEvent {
            item_id,
            completion,
        }));
    }

    fn complete_input_audio(&mut self, item_id: &str, transcript: Option<String>) {
        match self.pending_input.remove(item_id) {
            Some(tx) => {
                let _ = tx.send(Ok(transcript));
            }
            None => debug!("Transcription for unknown input item {}", item_id),
        }
    }

    fn open_response(&mut self, id: String) {
        let (tx, items) = chunk_channel();
        self.responses.insert(id.clone(), tx);
        self.emit(UpstreamEvent::Response(ResponseEvent { id, items }));
    }

    fn close_response(&mut self, id: &str) {
        self.responses.remove(id);
        let finished: Vec<String> = self
            .items
            .iter()
            .filter(|(_, route)| route.response_id == id)
            .map(|(item_id, _)| item_id.clone())
            .collect();
        for item_id in finished {
            self.close_item(&item_id);
        }
    }

    fn open_item(&mut self, response_id: &str, item_id: String, kind: String) {
        let Some(items) = self.responses.get(response_id) else {
            debug!("Output item {} for unknown response {}", item_id, response_id);
            return;
        };

        if kind != "message" {
            let _ = items.send(Ok(OutputItem::Other { id: item_id, kind }));
            return;
        }

        let (contents, stream) = chunk_channel();
        let _ = items.send(Ok(OutputItem::Message(MessageItem {
            id: item_id.clone(),
            contents: stream,
        })));
        self.items.insert(
            item_id,
            ItemRoute {
                response_id: response_id.to_string(),
                contents,
            },
        );
    }

    fn close_item(&mut self, item_id: &str) {
        self.items.remove(item_id);
        self.texts.retain(|key, _| key.item_id != item_id);
        self.audio.retain(|key, _| key.item_id != item_id);
        self.transcripts.retain(|key, _| key.item_id != item_id);
    }

    fn open_content(&mut self, item_id: &str, index: u32, part: ContentPart) {
        let Some(route) = self.items.get(item_id) else {
            debug!("Content part for unknown item {}", item_id);
            return;
        };

        let key = ContentKey::new(item_id, index);
        let entry = match part.content_type.as_str() {
            "text" => {
                let (tx, chunks) = chunk_channel();
                self.texts.insert(key, tx);
                ContentEntry::Text(TextContent { index, chunks })
            }
            "audio" => {
                let (audio_tx, audio) = chunk_channel();
                let (transcript_tx, transcript) = chunk_channel();
                self.audio.insert(key.clone(), audio_tx);
                self.transcripts.insert(key, transcript_tx);
                ContentEntry::Audio(AudioContent {
                    index,
                    audio,
                    transcript,
                })
            }
            other => ContentEntry::Other {
                index,
                kind: other.to_string(),
            },
        };
        let _ = route.contents.send(Ok(entry));
    }
}

fn push<T>(senders: &HashMap<ContentKey, ChunkSender<T>>, key: &ContentKey, chunk: RealtimeResult<T>) {
    match senders.get(key) {
        Some(tx) => {
            let _ = tx.send(chunk);
        }
        None => debug!("Delta for closed content {}-{}", key.item_id, key.index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> ServerEvent {
        serde_json::from_value(value).unwrap()
    }

    fn text_response_events() -> Vec<ServerEvent> {
        vec![
            event(json!({"type": "response.created", "response": {"id": "resp_1"}})),
            event(json!({
                "type": "response.output_item.added",
                "response_id": "resp_1",
                "output_index": 0,
                "item": {"id": "item_1", "type": "message", "role": "assistant"}
            })),
            event(json!({
                "type": "response.content_part.added",
                "response_id": "resp_1",
                "item_id": "item_1",
                "output_index": 0,
                "content_index": 0,
                "part": {"type": "text", "text": ""}
            })),
            event(json!({
                "type": "response.text.delta",
                "item_id": "item_1",
                "content_index": 0,
                "delta": "Hel"
            })),
            event(json!({
                "type": "response.text.delta",
                "item_id": "item_1",
                "content_index": 0,
                "delta": "lo"
            })),
            event(json!({"type": "response.text.done", "item_id": "item_1", "content_index": 0})),
            event(json!({
                "type": "response.output_item.done",
                "response_id": "resp_1",
                "item": {"id": "item_1", "type": "message"}
            })),
            event(json!({"type": "response.done", "response": {"id": "resp_1"}})),
        ]
    }

    #[tokio::test]
    async fn test_text_response_is_nested() {
        let (mut demux, mut events) = EventDemux::new();
        for e in text_response_events() {
            demux.handle(e);
        }

        let Some(Ok(UpstreamEvent::Response(response))) = events.next().await else {
            panic!("expected a response event");
        };
        assert_eq!(response.id, "resp_1");

        let mut items = response.items;
        let Some(Ok(OutputItem::Message(message))) = items.next().await else {
            panic!("expected a message item");
        };
        assert_eq!(message.id, "item_1");
        assert!(items.next().await.is_none());

        let mut contents = message.contents;
        let Some(Ok(ContentEntry::Text(text))) = contents.next().await else {
            panic!("expected text content");
        };
        assert_eq!(text.index, 0);
        assert!(contents.next().await.is_none());

        let chunks: Vec<String> = text.chunks.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_audio_content_decodes_base64() {
        let (mut demux, _events) = EventDemux::new();
        demux.handle(event(json!({"type": "response.created", "response": {"id": "r"}})));
        demux.handle(event(json!({
            "type": "response.output_item.added",
            "response_id": "r",
            "item": {"id": "i", "type": "message"}
        })));
        let (tx, mut contents) = chunk_channel();
        demux.items.get_mut("i").unwrap().contents = tx;

        demux.handle(event(json!({
            "type": "response.content_part.added",
            "response_id": "r",
            "item_id": "i",
            "content_index": 1,
            "part": {"type": "audio"}
        })));
        demux.handle(event(json!({
            "type": "response.audio.delta",
            "item_id": "i",
            "content_index": 1,
            "delta": "AAECAw=="
        })));
        demux.handle(event(json!({
            "type": "response.audio_transcript.delta",
            "item_id": "i",
            "content_index": 1,
            "delta": "hey"
        })));
        demux.handle(event(json!({
            "type": "response.content_part.done",
            "response_id": "r",
            "item_id": "i",
            "content_index": 1
        })));

        let Some(Ok(ContentEntry::Audio(audio))) = contents.next().await else {
            panic!("expected audio content");
        };
        let frames: Vec<Bytes> = audio.audio.map(|c| c.unwrap()).collect().await;
        assert_eq!(frames, vec![Bytes::from_static(&[0, 1, 2, 3])]);
        let transcript: Vec<String> = audio.transcript.map(|c| c.unwrap()).collect().await;
        assert_eq!(transcript, vec!["hey"]);
    }

    #[tokio::test]
    async fn test_speech_started_resolves_on_transcription() {
        let (mut demux, mut events) = EventDemux::new();
        demux.handle(event(json!({
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 120,
            "item_id": "in_1"
        })));
        demux.handle(event(json!({
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 130,
            "item_id": "in_1"
        })));
        demux.handle(event(json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": "in_1",
            "content_index": 0,
            "transcript": "hello there"
        })));

        let Some(Ok(UpstreamEvent::InputAudio(input))) = events.next().await else {
            panic!("expected an input audio event");
        };
        assert_eq!(input.item_id, "in_1");
        assert_eq!(input.completion.await.unwrap(), Some("hello there".to_string()));
    }

    #[tokio::test]
    async fn test_transcription_failure_resolves_none() {
        let (mut demux, mut events) = EventDemux::new();
        demux.handle(event(json!({
            "type": "input_audio_buffer.speech_started",
            "item_id": "in_2"
        })));
        demux.handle(event(json!({
            "type": "conversation.item.input_audio_transcription.failed",
            "item_id": "in_2",
            "error": {"type": "transcription_error", "message": "no audio"}
        })));

        let Some(Ok(UpstreamEvent::InputAudio(input))) = events.next().await else {
            panic!("expected an input audio event");
        };
        assert_eq!(input.completion.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fail_reaches_open_streams() {
        let (mut demux, mut events) = EventDemux::new();
        let events_before_fail = text_response_events();
        for e in events_before_fail.into_iter().take(4) {
            demux.handle(e);
        }
        demux.fail(RealtimeError::WebSocketError("reset".to_string()));

        let Some(Ok(UpstreamEvent::Response(response))) = events.next().await else {
            panic!("expected a response event");
        };
        assert!(matches!(events.next().await, Some(Err(RealtimeError::WebSocketError(_)))));
        assert!(events.next().await.is_none());

        let mut items = response.items;
        let Some(Ok(OutputItem::Message(message))) = items.next().await else {
            panic!("expected a message item");
        };
        let mut contents = message.contents;
        let Some(Ok(ContentEntry::Text(text))) = contents.next().await else {
            panic!("expected text content");
        };
        let chunks: Vec<RealtimeResult<String>> = text.chunks.collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], Ok("Hel".to_string()));
        assert!(chunks[1].is_err());
    }

    #[tokio::test]
    async fn test_session_ack_and_error() {
        let (mut demux, _events) = EventDemux::new();

        let (tx, rx) = oneshot::channel();
        demux.expect_session_update(tx);
        demux.handle(event(json!({"type": "session.updated", "session": {"id": "s"}})));
        assert_eq!(rx.await.unwrap(), Ok(()));

        let (tx, rx) = oneshot::channel();
        demux.expect_session_update(tx);
        demux.handle(event(json!({
            "type": "error",
            "error": {"type": "invalid_request_error", "message": "bad voice"}
        })));
        assert!(matches!(rx.await.unwrap(), Err(RealtimeError::ProviderError(_))));
    }

    #[tokio::test]
    async fn test_non_message_item_is_other() {
        let (mut demux, mut events) = EventDemux::new();
        demux.handle(event(json!({"type": "response.created", "response": {"id": "r"}})));
        demux.handle(event(json!({
            "type": "response.output_item.added",
            "response_id": "r",
            "item": {"id": "fc_1", "type": "function_call"}
        })));
        demux.handle(event(json!({"type": "response.done", "response": {"id": "r"}})));

        let Some(Ok(UpstreamEvent::Response(response))) = events.next().await else {
            panic!("expected a response event");
        };
        let items: Vec<_> = response.items.collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0],
            Ok(OutputItem::Other { id, kind }) if id == "fc_1" && kind == "function_call"
        ));
    }
}
