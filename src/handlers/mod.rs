//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `relay` - Client WebSocket bound to a relay session

pub mod api;
pub mod relay;

pub use relay::relay_handler;
