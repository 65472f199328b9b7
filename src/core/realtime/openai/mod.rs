//! OpenAI Realtime API module.
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.

mod client;
mod config;
mod demux;
mod messages;

pub use client::OpenAIRealtime;
pub use config::{
    DEFAULT_CONFIGURE_TIMEOUT_MS, DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_VOICE,
    DEFAULT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_URL, OpenAIRealtimeVoice, is_known_voice,
    realtime_url,
};
pub use messages::{ClientEvent, ServerEvent, SessionConfig};
