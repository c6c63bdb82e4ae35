//! # Beacon SSE
//!
//! Server-side Server-Sent Events: the event-stream encoder and lifecycle
//! controller for one long-lived, one-directional connection to one client.
//!
//! An [`SseSession`] owns the write side of a backpressured byte pipe and
//! serializes structured data into SSE wire frames; the matching [`SseBody`]
//! is attached as the HTTP response body by the embedding server. The session
//! guarantees that the terminal signals (`end`, `error`) are framed exactly
//! once, no matter how many tasks race to close, error, or abort the stream.
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_sse::{SseConfig, SseSession};
//! use std::time::Duration;
//!
//! async fn events_handler() -> (http::HeaderMap, beacon_sse::SseBody) {
//!     let (session, body) = SseSession::with_config(
//!         SseConfig::new().with_retry(Duration::from_secs(3)),
//!     );
//!     let headers = session.headers().clone();
//!
//!     // Produce events from a background task.
//!     tokio::spawn(async move {
//!         for n in 0..10 {
//!             if session.write(&serde_json::json!({ "tick": n })).await.is_err() {
//!                 return;
//!             }
//!         }
//!         let _ = session.close().await;
//!     });
//!
//!     (headers, body)
//! }
//! ```
//!
//! ## Wire format
//!
//! ```text
//! retry: 3000
//! event: update
//! data: {"tick":1}
//!
//! ```
//!
//! - `retry`: reconnection delay hint, advertised once, before any frame
//! - `event`: event name (clients default to `message` when absent)
//! - `data`: JSON-encoded payload, one frame per `write`
//! - a blank line terminates each frame; comment lines (`:`) are heartbeats
//!
//! ## Termination
//!
//! - [`SseSession::close`]: cooperative. One `event: end` frame, clean EOF.
//! - [`SseSession::error`]: one `event: error` frame, then the `close` path.
//! - [`SseSession::abort`]: forced. The reader observes a cancellation fault
//!   carrying an [`AbortReason`] instead of EOF.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod error;
mod event;
mod session;
mod sink;

pub use config::SseConfig;
pub use error::{AbortReason, ErrorPayload, SseError, SseResult};
pub use event::{reserved, Comment, SseEvent};
pub use session::SseSession;
pub use sink::SseBody;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::SseConfig;
    pub use crate::error::{AbortReason, ErrorPayload, SseError, SseResult};
    pub use crate::event::{Comment, SseEvent};
    pub use crate::session::SseSession;
    pub use crate::sink::SseBody;
}
