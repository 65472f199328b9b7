//! Base traits and types for the upstream realtime conversation API.
//!
//! The relay core never talks to a concrete provider. It drives a
//! [`RealtimeUpstream`] and consumes the nested event hierarchy defined in
//! [`super::events`].
//!
//! # Audio Format
//!
//! Audio crosses this boundary as opaque PCM 16-bit signed little-endian frames.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::events::UpstreamEvents;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during upstream operations.
///
/// Cloneable so a single transport failure can be delivered to every
/// stream that is still open when the connection dies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Error event reported by the provider
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Session error
    #[error("Session error: {0}")]
    SessionError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type for upstream operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Connection-level configuration for an upstream client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    #[serde(default)]
    pub model: String,

    /// Endpoint override; the provider default is used when unset
    #[serde(default)]
    pub url: Option<String>,

    /// How long `configure` waits for the provider to acknowledge the session
    #[serde(default)]
    pub configure_timeout_ms: Option<u64>,
}

/// Output modalities requested from the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

impl Modality {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }
}

/// Audio encodings understood by the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioFormat {
    /// PCM 16-bit signed little-endian (default)
    #[default]
    #[serde(rename = "pcm16")]
    Pcm16,
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

impl AudioFormat {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "whisper-1")
    pub model: String,
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side voice activity detection
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default)]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default)]
        silence_duration_ms: Option<u32>,
        /// Whether the upstream answers automatically at end of turn
        #[serde(default)]
        create_response: Option<bool>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(true),
        }
    }
}

/// Conversation parameters applied by [`RealtimeUpstream::configure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub modalities: Vec<Modality>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    #[serde(default)]
    pub input_audio_transcription: Option<InputTranscriptionConfig>,
    #[serde(default)]
    pub turn_detection: Option<TurnDetectionConfig>,
}

/// An item appended to the upstream conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputItem {
    /// A typed user message
    UserText(String),
}

impl InputItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::UserText(text.into())
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state for upstream clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Upstream Trait
// =============================================================================

/// Contract between the relay core and an upstream realtime API.
///
/// Every operation may fail asynchronously; callers map failures onto their
/// own lifecycle. Implementations must tolerate `close` being called on a
/// connection that never finished configuring.
#[async_trait]
pub trait RealtimeUpstream: Send {
    /// Open the connection if needed and apply the conversation parameters.
    async fn configure(&mut self, options: SessionOptions) -> RealtimeResult<()>;

    /// Forward one opaque audio frame.
    async fn send_audio(&mut self, audio: Bytes) -> RealtimeResult<()>;

    /// Append an item to the conversation.
    async fn send_item(&mut self, item: InputItem) -> RealtimeResult<()>;

    /// Ask the upstream to produce a response for the conversation so far.
    async fn generate_response(&mut self) -> RealtimeResult<()>;

    /// Take the event sequence. It can be taken once per connection.
    fn events(&mut self) -> RealtimeResult<UpstreamEvents>;

    /// Release the connection. Calling it more than once is a no-op.
    async fn close(&mut self) -> RealtimeResult<()>;
}

/// Boxed upstream for dynamic dispatch.
pub type BoxedUpstream = Box<dyn RealtimeUpstream>;
