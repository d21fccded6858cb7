//! Wire model for the realtime chat transport.
//!
//! Every inbound text frame is one JSON object discriminated by `type`. The
//! socket parses frames into [`InboundEvent`] and the session matches on it
//! exhaustively. Locally synthesized lifecycle notifications (status changes,
//! transport errors) reuse the `connection` and `error` variants.
//!
//! ERROR HANDLING
//! ==============
//! Parsing never panics. Callers get a [`FrameError`] and are expected to log
//! and drop the frame; a bad frame is not a connection failure.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame `type` values this client understands.
const KNOWN_TYPES: [&str; 7] =
    ["mood_update", "response_chunk", "thinking", "token_update", "complete", "error", "connection"];

/// Error returned by [`parse_frame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The text was not valid JSON.
    #[error("frame is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON value had no string `type` field.
    #[error("frame has no `type` discriminator")]
    MissingType,
    /// The `type` field named a frame this client does not handle.
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    /// The `type` was known but the payload fields did not match it.
    #[error("invalid `{kind}` frame: {source}")]
    Invalid {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// MOOD
// =============================================================================

/// Animation category attached to a mood. Closed set; anything else is a
/// malformed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodAnimation {
    Pulse,
    Glow,
    Shimmer,
    Swirl,
    Flicker,
    Still,
}

/// Presentational assistant mood, forwarded as-is from the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mood {
    /// Stable identifier, e.g. `"prescient"`.
    pub name: String,
    /// Display label.
    pub label: String,
    /// CSS-style color string.
    pub color: String,
    pub animation: MoodAnimation,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

// =============================================================================
// CONNECTION STATUS
// =============================================================================

/// Connection indicator as reported to the consumer.
///
/// `connecting` is never reported; a socket is `disconnected` until its first
/// successful open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
    Reconnecting,
}

impl ConnectionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// INBOUND EVENT
// =============================================================================

/// One inbound frame, or one locally synthesized lifecycle notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    MoodUpdate { mood: Mood },
    ResponseChunk { chunk: String },
    Thinking { message: String },
    TokenUpdate { tokens_remaining: u64 },
    Complete,
    Error { message: String },
    Connection { status: ConnectionStatus },
}

impl InboundEvent {
    /// Wire `type` of this event, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MoodUpdate { .. } => "mood_update",
            Self::ResponseChunk { .. } => "response_chunk",
            Self::Thinking { .. } => "thinking",
            Self::TokenUpdate { .. } => "token_update",
            Self::Complete => "complete",
            Self::Error { .. } => "error",
            Self::Connection { .. } => "connection",
        }
    }

    pub(crate) fn status(status: ConnectionStatus) -> Self {
        Self::Connection { status }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }
}

/// Parse one inbound text frame.
///
/// # Errors
///
/// Returns [`FrameError::Json`] for non-JSON text, [`FrameError::MissingType`]
/// when there is no string `type`, [`FrameError::UnknownType`] for types this
/// client does not handle, and [`FrameError::Invalid`] when the fields do not
/// match the declared type.
pub fn parse_frame(text: &str) -> Result<InboundEvent, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_owned();

    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(FrameError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|source| FrameError::Invalid { kind, source })
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Convenience outbound payloads. The transport accepts any `Serialize`
/// value; this is the shape the terminal client sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    #[serde(rename = "message")]
    User { content: String },
}

impl OutboundMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::User { content: content.into() }
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
