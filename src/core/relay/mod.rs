//! Session relay between a browser client and the upstream realtime API.
//!
//! - [`codec`] translates client wire messages
//! - [`outbound`] queues frames for the single client writer
//! - [`dispatch`] turns upstream events into client messages
//! - [`session`] owns the lifecycle of one connection

pub mod codec;
pub mod dispatch;
mod error;
pub mod outbound;
pub mod session;

pub use codec::{ContentRef, ControlMessage, Decoded, MAX_TEXT_SIZE, WireMessage, decode};
pub use error::{RelayError, RelayResult};
pub use outbound::{CLIENT_CHANNEL_CAPACITY, ClientSink, OutboundFrame};
pub use session::{ClientFrame, DEFAULT_GREETING, RelaySession, SessionSettings, SessionState};
