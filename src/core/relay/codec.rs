//! Client wire protocol.
//!
//! Text frames carry JSON objects tagged by `type`; binary frames carry raw
//! PCM16 audio and never pass through this module.
//!
//! | Direction | Message | Shape |
//! |-----------|---------|-------|
//! | client→server | `user_message` | `{type, id, text}` |
//! | server→client | `text_delta` | `{type, id, delta}` |
//! | server→client | `transcription` | `{type, id, text}` |
//! | server→client | `control` | `{type, action, ...}` |

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{RelayError, RelayResult};

/// Maximum allowed size for user message text (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Correlates every delta of one content stream with its `text_done`.
///
/// Rendered as `"{item_id}-{content_index}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(String);

impl ContentRef {
    pub fn new(item_id: &str, content_index: u32) -> Self {
        Self(format!("{item_id}-{content_index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Wire Messages
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Typed input from the user
    UserMessage { id: String, text: String },

    /// One fragment of assistant text or of an audio transcript
    TextDelta { id: ContentRef, delta: String },

    /// Recognized text of a span of user speech
    Transcription { id: String, text: String },

    Control(ControlMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    Connected { greeting: String },
    SpeechStarted,
    TextDone { id: ContentRef },
}

impl WireMessage {
    /// Wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::UserMessage { .. } => "user_message",
            WireMessage::TextDelta { .. } => "text_delta",
            WireMessage::Transcription { .. } => "transcription",
            WireMessage::Control(_) => "control",
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn validate_size(&self) -> RelayResult<()> {
        if let WireMessage::UserMessage { text, .. } = self
            && text.len() > MAX_TEXT_SIZE
        {
            return Err(RelayError::MalformedMessage(format!(
                "text too large: {} bytes (max: {} bytes)",
                text.len(),
                MAX_TEXT_SIZE
            )));
        }
        Ok(())
    }
}

/// Result of decoding one client text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(WireMessage),
    /// Well-formed JSON with a `type` this relay does not know
    Unrecognized(String),
}

const KNOWN_KINDS: &[&str] = &["user_message", "text_delta", "transcription", "control"];

/// Decode one client text frame.
///
/// Unknown `type` values are not an error, so newer clients keep working.
pub fn decode(raw: &str) -> RelayResult<Decoded> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| RelayError::MalformedMessage(e.to_string()))?;

    let Some(kind) = value.get("type").and_then(|t| t.as_str()) else {
        return Err(RelayError::MalformedMessage(
            "missing string field `type`".to_string(),
        ));
    };

    if !KNOWN_KINDS.contains(&kind) {
        return Ok(Decoded::Unrecognized(kind.to_string()));
    }

    let message: WireMessage = serde_json::from_value(value)
        .map_err(|e| RelayError::MalformedMessage(e.to_string()))?;
    message.validate_size()?;
    Ok(Decoded::Message(message))
}
