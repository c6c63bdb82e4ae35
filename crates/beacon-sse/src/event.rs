//! SSE wire-format encoding.
//!
//! Frames follow the `text/event-stream` grammar: optional `event:` line,
//! one or more `data:` lines, blank line to terminate the frame.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::error::SseResult;

/// Event names the session reserves for its own lifecycle signals.
pub mod reserved {
    /// Terminal frame emitted by a graceful close. Payload is always `""`.
    pub const END: &str = "end";
    /// Frame carrying an application error payload.
    pub const ERROR: &str = "error";
}

/// A single Server-Sent Event frame.
///
/// # Example
///
/// ```
/// use beacon_sse::SseEvent;
///
/// let event = SseEvent::new("\"hi\"").event("greeting");
/// assert_eq!(event.to_wire(), "event: greeting\ndata: \"hi\"\n\n");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Optional event name (`message` on the client when absent).
    event: Option<String>,
    /// Payload text, already encoded by the caller.
    data: String,
}

impl SseEvent {
    /// Create an event carrying pre-encoded payload text.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// Create an event from a JSON-serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> SseResult<Self> {
        Ok(Self::new(serde_json::to_string(value)?))
    }

    /// Set the event name.
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.event = Some(name.into());
        self
    }

    /// Get the event name.
    pub fn event_name(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Get the payload text.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Format the frame as event-stream text.
    pub fn to_wire(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 16);

        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }

        // Multi-line payloads need one "data:" line per line.
        if self.data.is_empty() {
            out.push_str("data: \n");
        } else {
            for line in self.data.lines() {
                out.push_str("data: ");
                out.push_str(line);
                out.push('\n');
            }
        }

        out.push('\n');
        out
    }

    /// Encode the frame for the sink.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_wire())
    }
}

impl From<String> for SseEvent {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}

impl From<&str> for SseEvent {
    fn from(data: &str) -> Self {
        Self::new(data)
    }
}

/// A comment line, ignored by `EventSource` clients.
///
/// Used for keep-alive heartbeats on otherwise idle connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment(String);

impl Comment {
    /// Create a comment.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The comment text.
    pub fn text(&self) -> &str {
        &self.0
    }

    /// Format as event-stream text.
    pub fn to_wire(&self) -> String {
        format!(": {}\n\n", self.0)
    }

    /// Encode for the sink.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_wire())
    }
}

/// The one-shot reconnection-delay directive, advertised ahead of all frames.
pub fn retry_directive(retry: Duration) -> Bytes {
    Bytes::from(format!("retry: {}\n", retry.as_millis()))
}

/// The terminal frame of a graceful close: `event: end` with the JSON string
/// `""` as payload.
pub(crate) fn end_frame() -> Bytes {
    SseEvent::new("\"\"").event(reserved::END).to_bytes()
}
