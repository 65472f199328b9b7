//! Outbound path to the client.
//!
//! All writers share one [`ClientSink`]; a single task owns the socket and
//! drains the queue, so frames from concurrent content handlers never
//! interleave mid-write.

use bytes::Bytes;
use tokio::sync::mpsc;

use super::codec::{ContentRef, ControlMessage, WireMessage};
use super::error::{RelayError, RelayResult};

/// Capacity of the outbound queue.
pub const CLIENT_CHANNEL_CAPACITY: usize = 1024;

/// One unit of work for the client writer task.
#[derive(Debug)]
pub enum OutboundFrame {
    /// JSON message, encoded by the writer
    Message(WireMessage),
    /// Raw PCM16 audio frame
    Audio(Bytes),
    /// Close the connection after everything queued so far
    Close,
}

#[derive(Debug, Clone)]
pub struct ClientSink {
    tx: mpsc::Sender<OutboundFrame>,
}

impl ClientSink {
    pub fn new(tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiver the writer task drains.
    pub fn channel() -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, frame: OutboundFrame) -> RelayResult<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| RelayError::Transport("client writer is closed".to_string()))
    }

    pub async fn text_delta(&self, id: &ContentRef, delta: String) -> RelayResult<()> {
        self.send(OutboundFrame::Message(WireMessage::TextDelta {
            id: id.clone(),
            delta,
        }))
        .await
    }

    pub async fn text_done(&self, id: &ContentRef) -> RelayResult<()> {
        self.control(ControlMessage::TextDone { id: id.clone() })
            .await
    }

    pub async fn audio(&self, frame: Bytes) -> RelayResult<()> {
        self.send(OutboundFrame::Audio(frame)).await
    }

    pub async fn speech_started(&self) -> RelayResult<()> {
        self.control(ControlMessage::SpeechStarted).await
    }

    pub async fn transcription(&self, item_id: String, text: String) -> RelayResult<()> {
        self.send(OutboundFrame::Message(WireMessage::Transcription {
            id: item_id,
            text,
        }))
        .await
    }

    pub async fn connected(&self, greeting: String) -> RelayResult<()> {
        self.control(ControlMessage::Connected { greeting }).await
    }

    /// Ask the writer to close the connection. A writer that is already gone
    /// is fine.
    pub async fn close(&self) {
        let _ = self.tx.send(OutboundFrame::Close).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn control(&self, message: ControlMessage) -> RelayResult<()> {
        self.send(OutboundFrame::Message(WireMessage::Control(message)))
            .await
    }
}
