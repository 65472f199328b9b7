//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET /realtime` - WebSocket upgrade for one relay session
///
/// # Protocol
///
/// Client sends:
/// - `{"type": "user_message", "id": "...", "text": "..."}` for typed input
/// - Binary frames of PCM16 audio (24 kHz, mono)
///
/// Server sends:
/// - `{"type": "control", "action": "connected", "greeting": "..."}` once configured
/// - `text_delta` fragments, each stream closed by a `text_done` control message
/// - `speech_started` control messages and `transcription` messages for user speech
/// - Binary frames of PCM16 audio from the assistant
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/realtime", get(relay_handler))
        .layer(TraceLayer::new_for_http())
}
