use thiserror::Error;

use crate::core::realtime::RealtimeError;

/// Errors raised while relaying one client session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A client text frame could not be decoded
    #[error("Malformed client message: {0}")]
    MalformedMessage(String),

    /// The upstream rejected or never acknowledged the session parameters
    #[error("Upstream configuration failed: {0}")]
    UpstreamConfiguration(#[source] RealtimeError),

    /// Forwarding client input to the upstream failed
    #[error("Upstream send failed: {0}")]
    UpstreamSend(#[source] RealtimeError),

    /// The upstream event hierarchy yielded an error
    #[error("Upstream stream failed: {0}")]
    UpstreamStream(#[source] RealtimeError),

    /// The client connection can no longer be written to or read from
    #[error("Client transport error: {0}")]
    Transport(String),

    /// Releasing the upstream connection failed
    #[error("Upstream close failed: {0}")]
    Close(#[source] RealtimeError),
}

impl RelayError {
    /// Whether the error ends the session.
    ///
    /// Only malformed client input is survivable; everything else leaves
    /// one side of the bridge in an unknown state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RelayError::MalformedMessage(_))
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
