//! OpenAI Realtime endpoint settings.
//!
//! Holds the defaults the relay applies when the deployment leaves a value
//! unset, and builds the connection URL for a given model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::realtime::base::{RealtimeError, RealtimeResult};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";
pub const DEFAULT_REALTIME_VOICE: &str = "alloy";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Default wait for `session.updated` after sending `session.update`.
pub const DEFAULT_CONFIGURE_TIMEOUT_MS: u64 = 10_000;

/// Voices accepted by the Realtime API.
///
/// Deployments may still configure a voice outside this list; it is sent
/// as-is and the provider has the final word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl OpenAIRealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }
}

impl fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpenAIRealtimeVoice {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "alloy" => Ok(Self::Alloy),
            "ash" => Ok(Self::Ash),
            "ballad" => Ok(Self::Ballad),
            "coral" => Ok(Self::Coral),
            "echo" => Ok(Self::Echo),
            "sage" => Ok(Self::Sage),
            "shimmer" => Ok(Self::Shimmer),
            "verse" => Ok(Self::Verse),
            other => Err(RealtimeError::InvalidConfiguration(format!(
                "Unknown voice '{other}'"
            ))),
        }
    }
}

/// Whether `voice` is one the API is known to accept.
pub fn is_known_voice(voice: &str) -> bool {
    voice.parse::<OpenAIRealtimeVoice>().is_ok()
}

/// Build the connection URL: `base` with `model` set as a query parameter.
///
/// `base` must use the `ws` or `wss` scheme. Any existing `model` parameter
/// is replaced; other parameters are kept.
pub fn realtime_url(base: &str, model: &str) -> RealtimeResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| RealtimeError::InvalidConfiguration(format!("Invalid URL {base}: {e}")))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(RealtimeError::InvalidConfiguration(format!(
            "Unsupported URL scheme '{}', expected ws or wss",
            url.scheme()
        )));
    }

    let model = if model.is_empty() {
        DEFAULT_REALTIME_MODEL
    } else {
        model
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "model")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        query.append_pair("model", model);
    }

    Ok(url)
}
