//! Session configuration.

use std::time::Duration;

/// Configuration for an SSE session.
#[derive(Debug, Clone)]
pub struct SseConfig {
    /// Capacity of the bounded frame queue between session and body.
    /// Values below 1 are treated as 1.
    pub buffer_size: usize,
    /// Reconnection delay advertised to the client once, before any frame.
    pub retry: Option<Duration>,
    /// Comment-frame heartbeat emitted while the connection is idle.
    /// Disabled by default so the wire carries exactly what was written.
    pub keep_alive: Option<Duration>,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            buffer_size: 32,
            retry: None,
            keep_alive: None,
        }
    }
}

impl SseConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frame queue capacity.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Advertise a reconnection delay to the client.
    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Enable the idle heartbeat.
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }
}
