//! Upstream realtime conversation API module.
//!
//! # Architecture
//!
//! - [`RealtimeUpstream`] trait for the provider abstraction
//! - [`events`] for the nested, consume-once output hierarchy
//! - [`create_upstream`] factory for dynamic provider creation
//!
//! # Example
//!
//! ```rust,ignore
//! use voice_relay::core::realtime::{create_upstream, RealtimeConfig};
//!
//! let config = RealtimeConfig {
//!     api_key: "sk-...".to_string(),
//!     model: "gpt-4o-realtime-preview".to_string(),
//!     ..Default::default()
//! };
//!
//! let mut upstream = create_upstream("openai", config)?;
//! upstream.configure(options).await?;
//! ```

mod base;
pub mod events;
pub mod openai;

pub use base::{
    AudioFormat, BoxedUpstream, ConnectionState, InputItem, InputTranscriptionConfig, Modality,
    RealtimeConfig, RealtimeError, RealtimeResult, RealtimeUpstream, SessionOptions,
    TurnDetectionConfig,
};
pub use events::{
    AudioContent, ChunkStream, ContentEntry, InputAudioEvent, MessageItem, OutputItem,
    ResponseEvent, TextContent, TranscriptionFuture, UpstreamEvent, UpstreamEvents,
};
pub use openai::{OPENAI_REALTIME_URL, OpenAIRealtime};

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeProvider {
    /// OpenAI Realtime API
    OpenAI,
}

impl RealtimeProvider {
    /// Parse provider from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(RealtimeProvider::OpenAI),
            _ => None,
        }
    }
}

impl std::fmt::Display for RealtimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealtimeProvider::OpenAI => write!(f, "openai"),
        }
    }
}

/// Factory function to create an upstream client.
///
/// # Supported Providers
///
/// - `"openai"` - OpenAI Realtime API
pub fn create_upstream(provider: &str, config: RealtimeConfig) -> RealtimeResult<BoxedUpstream> {
    match RealtimeProvider::parse(provider) {
        Some(RealtimeProvider::OpenAI) => Ok(Box::new(OpenAIRealtime::new(config)?)),
        None => Err(RealtimeError::InvalidConfiguration(format!(
            "Unsupported realtime provider: {provider}. Supported providers: {}",
            get_supported_realtime_providers().join(", ")
        ))),
    }
}

/// Get list of supported upstream providers.
pub fn get_supported_realtime_providers() -> Vec<&'static str> {
    vec!["openai"]
}
