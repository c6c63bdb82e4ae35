//! Error types for Server-Sent Events sessions.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Result type for SSE operations.
pub type SseResult<T> = Result<T, SseError>;

/// Errors that can occur during SSE session operations.
#[derive(Debug, Error)]
pub enum SseError {
    /// The sink was released (graceful close, or the reader went away).
    #[error("sink closed: {0}")]
    SinkClosed(String),

    /// The sink's bounded queue is full (backpressure, non-blocking writes only).
    #[error("channel full, backpressure limit reached")]
    ChannelFull,

    /// Failed to serialize event data to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The session was aborted. Carries the cancellation reason.
    #[error("stream aborted: {0}")]
    Aborted(AbortReason),
}

impl SseError {
    /// Create a sink closed error.
    pub fn sink_closed(reason: impl Into<String>) -> Self {
        Self::SinkClosed(reason.into())
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization(reason.into())
    }

    /// Whether this error is the cancellation signal raised by `abort`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

impl From<serde_json::Error> for SseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Structured reason attached to a forced session teardown.
///
/// Propagated both to a writer suspended on backpressure and to a reader
/// suspended on the body stream, so both sides observe the same cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortReason {
    message: String,
}

impl AbortReason {
    /// Cancellation kind, mirroring the DOM `AbortError` name clients expect.
    pub const KIND: &'static str = "AbortError";

    /// Message used when `abort` is called without an explicit reason.
    pub const DEFAULT_MESSAGE: &'static str = "Stream writer aborted.";

    /// Create a reason with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The cancellation kind.
    pub fn kind(&self) -> &'static str {
        Self::KIND
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Default for AbortReason {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MESSAGE)
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Capability for turning an application error into the payload of an
/// `event: error` frame.
///
/// Errors that carry structured context implement [`structured`] to put a JSON
/// object on the wire; everything else falls back to the display message as a
/// JSON string.
///
/// [`structured`]: ErrorPayload::structured
pub trait ErrorPayload: fmt::Display {
    /// Structured JSON payload, if this error defines one.
    fn structured(&self) -> Option<Value> {
        None
    }

    /// Resolve the wire payload.
    ///
    /// An absent or empty-object structured payload falls back to the display
    /// message, so an error with no serializable content still reaches the
    /// client as `"<message>"` rather than `{}`.
    fn payload(&self) -> Value {
        match self.structured() {
            Some(Value::Object(map)) if map.is_empty() => Value::String(self.to_string()),
            Some(value) => value,
            None => Value::String(self.to_string()),
        }
    }
}

impl ErrorPayload for str {}
impl ErrorPayload for String {}
impl ErrorPayload for SseError {}
