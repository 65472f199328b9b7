//! Nested, consume-once view of upstream output.
//!
//! The upstream produces events; a response event produces items; a message
//! item produces content entries; each content entry produces chunks. Every
//! level is a stream that is read exactly once, so nothing is buffered beyond
//! what the producer has already pushed.

use std::fmt;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use super::base::RealtimeResult;

/// A lazily produced, fallible sequence consumed exactly once.
pub type ChunkStream<T> = BoxStream<'static, RealtimeResult<T>>;

/// The top-level upstream event sequence.
pub type UpstreamEvents = ChunkStream<UpstreamEvent>;

/// Resolves when the upstream has finished processing an input audio item.
/// Yields the recognized text, or `None` when transcription is unavailable.
pub type TranscriptionFuture = BoxFuture<'static, RealtimeResult<Option<String>>>;

pub enum UpstreamEvent {
    Response(ResponseEvent),
    InputAudio(InputAudioEvent),
}

impl UpstreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamEvent::Response(_) => "response",
            UpstreamEvent::InputAudio(_) => "input_audio",
        }
    }
}

impl fmt::Debug for UpstreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamEvent::Response(r) => f.debug_tuple("Response").field(&r.id).finish(),
            UpstreamEvent::InputAudio(i) => f.debug_tuple("InputAudio").field(&i.item_id).finish(),
        }
    }
}

/// One generated response: an ordered sequence of output items.
pub struct ResponseEvent {
    pub id: String,
    pub items: ChunkStream<OutputItem>,
}

pub enum OutputItem {
    Message(MessageItem),
    /// Any item kind the relay does not forward (function calls, ...)
    Other { id: String, kind: String },
}

/// A message item: an ordered sequence of content entries.
pub struct MessageItem {
    pub id: String,
    pub contents: ChunkStream<ContentEntry>,
}

pub enum ContentEntry {
    Text(TextContent),
    Audio(AudioContent),
    Other { index: u32, kind: String },
}

pub struct TextContent {
    pub index: u32,
    pub chunks: ChunkStream<String>,
}

/// Audio content carries two independent sequences: raw audio and the
/// transcript of what is being said.
pub struct AudioContent {
    pub index: u32,
    pub audio: ChunkStream<Bytes>,
    pub transcript: ChunkStream<String>,
}

/// A span of user speech detected by the upstream.
pub struct InputAudioEvent {
    pub item_id: String,
    pub completion: TranscriptionFuture,
}
