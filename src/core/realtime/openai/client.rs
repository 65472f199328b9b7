//! OpenAI Realtime API client implementation.
//!
//! This module provides the OpenAI Realtime client that implements the
//! [`RealtimeUpstream`] trait using OpenAI's WebSocket-based Realtime API.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! # Example
//!
//! ```rust,ignore
//! use voice_relay::core::realtime::{OpenAIRealtime, RealtimeConfig, RealtimeUpstream};
//!
//! let mut upstream = OpenAIRealtime::new(RealtimeConfig {
//!     api_key: "sk-...".to_string(),
//!     model: "gpt-4o-realtime-preview".to_string(),
//!     ..Default::default()
//! })?;
//! upstream.configure(options).await?;
//! let events = upstream.events()?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::AUTHORIZATION;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, error, info, warn};

use super::config::{DEFAULT_CONFIGURE_TIMEOUT_MS, OPENAI_REALTIME_URL, realtime_url};
use super::demux::EventDemux;
use super::messages::{ClientEvent, ConversationItem, ServerEvent, SessionConfig};
use crate::core::realtime::base::{
    ConnectionState, InputItem, RealtimeConfig, RealtimeError, RealtimeResult, RealtimeUpstream,
    SessionOptions,
};
use crate::core::realtime::events::UpstreamEvents;

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `close` waits for the connection task to flush and exit.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Work handed to the connection task.
enum Command {
    Send(ClientEvent),
    Configure {
        session: SessionConfig,
        ack: oneshot::Sender<RealtimeResult<()>>,
    },
}

// =============================================================================
// OpenAI Realtime Client
// =============================================================================

/// OpenAI Realtime API client.
///
/// The WebSocket is owned by a spawned task. Outgoing events reach it over a
/// bounded channel; incoming events are routed by an [`EventDemux`] into the
/// nested streams returned from [`RealtimeUpstream::events`].
pub struct OpenAIRealtime {
    config: RealtimeConfig,
    connected: Arc<AtomicBool>,
    commands: Option<mpsc::Sender<Command>>,
    events: Option<UpstreamEvents>,
    connection_handle: Option<JoinHandle<()>>,
    closed: bool,
}

impl OpenAIRealtime {
    pub fn new(config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        // Fail fast on a bad endpoint rather than at first use
        realtime_url(Self::base_url(&config), &config.model)?;

        Ok(Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
            commands: None,
            events: None,
            connection_handle: None,
            closed: false,
        })
    }

    fn base_url(config: &RealtimeConfig) -> &str {
        config.url.as_deref().unwrap_or(OPENAI_REALTIME_URL)
    }

    pub fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.commands.is_some()
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.closed {
            ConnectionState::Closed
        } else if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn configure_timeout(&self) -> Duration {
        Duration::from_millis(
            self.config
                .configure_timeout_ms
                .unwrap_or(DEFAULT_CONFIGURE_TIMEOUT_MS),
        )
    }

    async fn connect(&mut self) -> RealtimeResult<()> {
        if self.closed {
            return Err(RealtimeError::SessionError(
                "connection has been closed".to_string(),
            ));
        }
        if self.is_ready() {
            return Ok(());
        }

        let url = realtime_url(Self::base_url(&self.config), &self.config.model)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| RealtimeError::AuthenticationFailed(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        request
            .headers_mut()
            .insert("openai-beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        info!("Connected to OpenAI Realtime API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<Command>(WS_CHANNEL_CAPACITY);
        let (mut demux, events) = EventDemux::new();
        let connected = self.connected.clone();

        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = rx.recv() => {
                        let event = match command {
                            Some(Command::Send(event)) => event,
                            Some(Command::Configure { session, ack }) => {
                                demux.expect_session_update(ack);
                                ClientEvent::SessionUpdate { session }
                            }
                            None => {
                                // Client side released the connection
                                let _ = ws_sink.send(Message::Close(None)).await;
                                break;
                            }
                        };

                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("Failed to serialize {}: {}", event.kind(), e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            error!("Failed to send WebSocket message: {}", e);
                            demux.fail(RealtimeError::WebSocketError(e.to_string()));
                            break;
                        }
                    }

                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        debug!("OpenAI Realtime event: {}", event.kind());
                                        demux.handle(event);
                                    }
                                    Err(e) => {
                                        warn!("Failed to parse server event: {} - {}", e, text);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("WebSocket closed by server: {:?}", frame);
                                demux.fail(RealtimeError::ConnectionFailed(
                                    "connection closed by server".to_string(),
                                ));
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                demux.fail(RealtimeError::WebSocketError(e.to_string()));
                                break;
                            }
                            None => {
                                demux.fail(RealtimeError::ConnectionFailed(
                                    "connection ended unexpectedly".to_string(),
                                ));
                                break;
                            }
                        }
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            info!("OpenAI Realtime connection task ended");
        });

        self.commands = Some(tx);
        self.events = Some(events);
        self.connection_handle = Some(handle);
        Ok(())
    }

    /// Send an event to the WebSocket.
    async fn send_event(&mut self, event: ClientEvent) -> RealtimeResult<()> {
        self.send_command(Command::Send(event)).await
    }

    async fn send_command(&mut self, command: Command) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        match self.commands.as_ref() {
            Some(sender) => sender
                .send(command)
                .await
                .map_err(|e| RealtimeError::WebSocketError(e.to_string())),
            None => Err(RealtimeError::NotConnected),
        }
    }
}

#[async_trait]
impl RealtimeUpstream for OpenAIRealtime {
    async fn configure(&mut self, options: SessionOptions) -> RealtimeResult<()> {
        self.connect().await?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.send_command(Command::Configure {
            session: SessionConfig::from(&options),
            ack: ack_tx,
        })
        .await?;

        let timeout = self.configure_timeout();
        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RealtimeError::ConnectionFailed(
                "connection closed before the session was updated".to_string(),
            )),
            Err(_) => Err(RealtimeError::Timeout(format!(
                "no session.updated within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn send_audio(&mut self, audio: Bytes) -> RealtimeResult<()> {
        self.send_event(ClientEvent::audio_append(&audio)).await
    }

    async fn send_item(&mut self, item: InputItem) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ConversationItemCreate {
            item: ConversationItem::from(item),
        })
        .await
    }

    async fn generate_response(&mut self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ResponseCreate).await
    }

    fn events(&mut self) -> RealtimeResult<UpstreamEvents> {
        if self.connection_handle.is_none() {
            return Err(RealtimeError::NotConnected);
        }
        self.events.take().ok_or_else(|| {
            RealtimeError::SessionError("event stream was already taken".to_string())
        })
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Dropping the sender tells the connection task to close the socket
        self.commands = None;
        self.events = None;

        if let Some(mut handle) = self.connection_handle.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(RealtimeError::InternalError(format!(
                        "connection task failed: {e}"
                    )));
                }
                Err(_) => {
                    warn!("OpenAI Realtime connection task did not exit in time, aborting");
                    handle.abort();
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!("Disconnected from OpenAI Realtime API");
        Ok(())
    }
}

impl Drop for OpenAIRealtime {
    fn drop(&mut self) {
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
