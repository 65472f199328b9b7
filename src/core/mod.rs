pub mod realtime;
pub mod relay;

// Re-export commonly used types for convenience
pub use realtime::{
    BoxedUpstream, OpenAIRealtime, RealtimeConfig, RealtimeError, RealtimeProvider,
    RealtimeResult, RealtimeUpstream, create_upstream, get_supported_realtime_providers,
};

pub use relay::{RelayError, RelayResult, RelaySession, SessionSettings, SessionState};
