//! Relay WebSocket handler
//!
//! Binds one upgraded client socket to one [`RelaySession`]. The socket is
//! split: a writer task owns the sink half and drains the session's
//! [`ClientSink`] queue, while the stream half is adapted into
//! [`ClientFrame`]s for the session.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{
    SinkExt, Stream, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};

use crate::core::realtime::create_upstream;
use crate::core::relay::{
    ClientFrame, ClientSink, OutboundFrame, RelayError, RelayResult, RelaySession,
};
use crate::state::{AppState, ConnectionPermit};

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How long queued frames may take to flush once the session ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Relay WebSocket handler
///
/// Upgrades the HTTP connection and runs one relay session over it. The
/// connection permit, when the limit middleware supplied one, is held until
/// the socket is done.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    permit: Option<Extension<Arc<ConnectionPermit>>>,
) -> Response {
    let permit = permit.map(|Extension(permit)| permit);
    debug!(
        ip = ?permit.as_ref().map(|p| p.ip()),
        "Relay WebSocket connection upgrade requested"
    );

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_relay_socket(socket, state, permit))
}

async fn handle_relay_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    _permit: Option<Arc<ConnectionPermit>>,
) {
    let (sender, receiver) = socket.split();
    let (sink, outbound_rx) = ClientSink::channel();
    let mut writer = tokio::spawn(write_client_frames(sender, outbound_rx));

    let config = &state.config;
    match create_upstream(&config.relay.provider, config.realtime_config()) {
        Ok(upstream) => {
            let mut session =
                RelaySession::new(upstream, sink.clone(), config.session_settings());
            info!(session_id = %session.id(), "Relay WebSocket connection established");

            match session.run(client_frames(receiver)).await {
                Ok(()) => info!(session_id = %session.id(), "Relay session finished"),
                Err(e) => warn!(session_id = %session.id(), "Relay session ended with error: {}", e),
            }
        }
        Err(e) => error!("Failed to create realtime upstream: {}", e),
    }

    // Queue the close after everything already sent, then give the writer a
    // bounded window to flush.
    let drained = timeout(WRITER_DRAIN_TIMEOUT, async {
        sink.close().await;
        (&mut writer).await
    })
    .await;

    match drained {
        Ok(Ok(())) => debug!("Client writer finished"),
        Ok(Err(e)) => error!("Client writer task failed: {}", e),
        Err(_) => {
            warn!("Client writer did not drain in time, aborting");
            writer.abort();
        }
    }
}

/// Single writer for the client socket.
async fn write_client_frames(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let result = match frame {
            OutboundFrame::Message(message) => match message.encode() {
                Ok(json) => sender.send(Message::Text(json.into())).await,
                Err(e) => {
                    error!(kind = message.kind(), "Failed to serialize outgoing message: {}", e);
                    continue;
                }
            },
            OutboundFrame::Audio(data) => sender.send(Message::Binary(data)).await,
            OutboundFrame::Close => {
                debug!("Closing relay WebSocket connection");
                if let Err(e) = sender.send(Message::Close(None)).await {
                    debug!("Close frame not delivered: {}", e);
                }
                break;
            }
        };

        if let Err(e) = result {
            warn!("Failed to send WebSocket message: {}", e);
            break;
        }
    }
}

/// Adapt the socket's read half into session input.
///
/// A close frame or end of stream ends the sequence; a read error is yielded
/// once as [`RelayError::Transport`].
fn client_frames(
    mut receiver: SplitStream<WebSocket>,
) -> impl Stream<Item = RelayResult<ClientFrame>> + Send {
    async_stream::stream! {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => yield Ok(ClientFrame::Text(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => yield Ok(ClientFrame::Binary(data)),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Client sent close frame");
                    break;
                }
                // Pings are answered by axum.
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => {
                    yield Err(RelayError::Transport(e.to_string()));
                    break;
                }
            }
        }
    }
}
