//! Per-connection session relay.
//!
//! A [`RelaySession`] owns one upstream connection and a handle to one
//! client connection. It configures the upstream, announces itself to the
//! client, then runs inbound client handling and the upstream event loop
//! side by side until either side ends.

use std::fmt;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::codec::{self, Decoded, WireMessage};
use super::dispatch;
use super::error::{RelayError, RelayResult};
use super::outbound::ClientSink;
use crate::core::realtime::openai::{DEFAULT_REALTIME_VOICE, DEFAULT_TRANSCRIPTION_MODEL};
use crate::core::realtime::{
    AudioFormat, BoxedUpstream, InputItem, InputTranscriptionConfig, Modality, SessionOptions,
    TurnDetectionConfig,
};

/// Greeting sent with the `connected` control message.
pub const DEFAULT_GREETING: &str = "Connected. Start talking or send a message.";

/// Lifecycle of a relay session.
///
/// `Created → Configuring → Active → Closing → Closed`; a configuration
/// failure skips `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Configuring,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Configuring => "configuring",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Deployment-level knobs for every session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub greeting: String,
    pub voice: String,
    pub instructions: Option<String>,
    pub transcription_model: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            voice: DEFAULT_REALTIME_VOICE.to_string(),
            instructions: None,
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        }
    }
}

impl SessionSettings {
    /// Conversation parameters sent to the upstream.
    ///
    /// Text and audio output, PCM16 both ways, server VAD and input
    /// transcription are fixed; only voice, instructions and the
    /// transcription model vary.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            modalities: vec![Modality::Text, Modality::Audio],
            instructions: self.instructions.clone(),
            voice: Some(self.voice.clone()),
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            input_audio_transcription: Some(InputTranscriptionConfig {
                model: self.transcription_model.clone(),
            }),
            turn_detection: Some(TurnDetectionConfig::default()),
        }
    }
}

/// One frame received from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Text(String),
    /// Raw PCM16 audio
    Binary(Bytes),
}

pub struct RelaySession {
    id: Uuid,
    state: SessionState,
    upstream: BoxedUpstream,
    sink: ClientSink,
    settings: SessionSettings,
}

impl RelaySession {
    pub fn new(upstream: BoxedUpstream, sink: ClientSink, settings: SessionSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Created,
            upstream,
            sink,
            settings,
        }
    }

    /// Diagnostic correlation id. Never sent to the client.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// Returns when the client stream ends, the upstream event sequence ends,
    /// or either side fails fatally. The upstream is always released before
    /// returning.
    pub async fn run<S>(&mut self, inbound: S) -> RelayResult<()>
    where
        S: Stream<Item = RelayResult<ClientFrame>> + Send,
    {
        let result = self.serve(inbound).await;
        if let Err(e) = &result {
            error!(session_id = %self.id, state = %self.state, "Relay session failed: {}", e);
        }
        self.on_client_close().await;
        result
    }

    async fn serve<S>(&mut self, inbound: S) -> RelayResult<()>
    where
        S: Stream<Item = RelayResult<ClientFrame>> + Send,
    {
        self.state = SessionState::Configuring;
        debug!(session_id = %self.id, "Configuring upstream");

        self.upstream
            .configure(self.settings.session_options())
            .await
            .map_err(RelayError::UpstreamConfiguration)?;
        let events = self
            .upstream
            .events()
            .map_err(RelayError::UpstreamStream)?;

        self.state = SessionState::Active;
        info!(session_id = %self.id, "Relay session active");
        self.sink.connected(self.settings.greeting.clone()).await?;

        let event_loop = dispatch::run_event_loop(events, self.sink.clone());

        tokio::select! {
            result = self.pump_inbound(inbound) => result,
            result = event_loop => result,
        }
    }

    async fn pump_inbound<S>(&mut self, inbound: S) -> RelayResult<()>
    where
        S: Stream<Item = RelayResult<ClientFrame>> + Send,
    {
        let mut inbound = std::pin::pin!(inbound);

        while let Some(frame) = inbound.next().await {
            if let Err(e) = self.on_client_message(frame?).await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(session_id = %self.id, "Ignoring client message: {}", e);
            }
        }

        debug!(session_id = %self.id, "Client stream ended");
        Ok(())
    }

    /// Handle one client frame.
    ///
    /// Binary frames go upstream untouched. Of the text messages only
    /// `user_message` is acted on; other kinds are ignored.
    pub async fn on_client_message(&mut self, frame: ClientFrame) -> RelayResult<()> {
        match frame {
            ClientFrame::Binary(audio) => self
                .upstream
                .send_audio(audio)
                .await
                .map_err(RelayError::UpstreamSend),
            ClientFrame::Text(raw) => match codec::decode(&raw)? {
                Decoded::Message(WireMessage::UserMessage { id, text }) => {
                    debug!(session_id = %self.id, message_id = %id, "User message");
                    self.upstream
                        .send_item(InputItem::user_text(text))
                        .await
                        .map_err(RelayError::UpstreamSend)?;
                    self.upstream
                        .generate_response()
                        .await
                        .map_err(RelayError::UpstreamSend)
                }
                Decoded::Message(other) => {
                    debug!(session_id = %self.id, kind = other.kind(), "Ignoring server-side message kind");
                    Ok(())
                }
                Decoded::Unrecognized(kind) => {
                    debug!(session_id = %self.id, kind = %kind, "Ignoring unknown message kind");
                    Ok(())
                }
            },
        }
    }

    /// Release the upstream. Safe to call more than once.
    pub async fn on_client_close(&mut self) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Closing;

        if let Err(e) = self.upstream.close().await {
            warn!(session_id = %self.id, "{}", RelayError::Close(e));
        }

        self.state = SessionState::Closed;
        info!(session_id = %self.id, "Relay session closed");
    }
}

impl fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySession")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}
