//! The SSE session: one outbound event stream and its lifecycle.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use http::header::{self, HeaderMap, HeaderValue};
use serde::Serialize;

use crate::config::SseConfig;
use crate::error::{AbortReason, ErrorPayload, SseResult};
use crate::event::{self, reserved, Comment, SseEvent};
use crate::sink::{self, SseBody, StreamSink};

// Session lifecycle states. `CLOSING` is the single-flight guard for the
// terminal sequence: exactly one close/error call wins the OPEN -> CLOSING
// transition, everyone else no-ops.
const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// One outbound Server-Sent Events connection to one client.
///
/// Owns the write side of a backpressured byte pipe; the matching [`SseBody`]
/// is handed to the HTTP layer as the response body. Three termination paths
/// exist and exactly one ever takes effect:
///
/// - [`close`](Self::close): cooperative. One `end` frame, then clean EOF.
/// - [`error`](Self::error): one `error` frame, then the same terminal sequence.
/// - [`abort`](Self::abort): forced. No `end` frame; the reader observes a
///   cancellation fault instead of EOF.
///
/// All methods take `&self`; the session can be shared via `Arc` across tasks.
pub struct SseSession {
    sink: StreamSink,
    headers: HeaderMap,
    state: AtomicU8,
    frames_written: AtomicU64,
}

impl SseSession {
    /// Create a session with the default configuration.
    pub fn new() -> (Self, SseBody) {
        Self::with_config(SseConfig::default())
    }

    /// Create a session with the given configuration.
    ///
    /// If a retry delay is configured, the `retry:` directive is staged into
    /// the (empty, hence always ready) pipe before this returns, so it is the
    /// first bytes on the wire.
    pub fn with_config(config: SseConfig) -> (Self, SseBody) {
        let (sink, body) = sink::pipe(&config);

        if let Some(retry) = config.retry {
            if let Err(err) = sink.write_now(event::retry_directive(retry)) {
                tracing::debug!(error = %err, "retry directive not staged");
            }
        }

        let session = Self {
            sink,
            headers: response_headers(),
            state: AtomicU8::new(OPEN),
            frames_written: AtomicU64::new(0),
        };

        (session, body)
    }

    /// Headers the enclosing HTTP response must carry for this body.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether the session has reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }

    /// Number of event frames forwarded to the sink.
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Send `data` as a JSON-encoded `message` frame.
    ///
    /// Suspends while the pipe is at capacity. After close or error this is a
    /// silent no-op: nothing reaches the wire and `Ok(())` is returned.
    pub async fn write<T: Serialize + ?Sized>(&self, data: &T) -> SseResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.deliver(SseEvent::json(data)?).await
    }

    /// Send `data` as a JSON-encoded frame under a named event.
    pub async fn write_event<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> SseResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.deliver(SseEvent::json(data)?.event(event)).await
    }

    /// Send `data` without suspending; a pipe at capacity is reported as
    /// [`SseError::ChannelFull`](crate::SseError::ChannelFull).
    pub fn try_write<T: Serialize + ?Sized>(&self, data: &T) -> SseResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.sink.write_now(SseEvent::json(data)?.to_bytes())?;
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Send a comment line (a manual heartbeat; clients ignore it).
    pub async fn comment(&self, text: impl Into<String>) -> SseResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.sink.write(Comment::new(text).to_bytes()).await
    }

    /// Terminate the stream gracefully.
    ///
    /// The winning call writes the `end` frame and releases the sink; queued
    /// frames still drain, then the reader sees a clean end-of-stream. Calls
    /// racing the winner, and any call after termination, are no-ops. The
    /// session is `closed` on every exit path, even if the `end` frame itself
    /// failed; that failure is returned to the caller.
    pub async fn close(&self) -> SseResult<()> {
        if self.begin_terminal().is_err() {
            return Ok(());
        }
        let _terminal = self.terminal_guard();

        let result = self.sink.write_terminal(event::end_frame()).await;
        if let Err(err) = &result {
            tracing::debug!(error = %err, "end frame not delivered");
        }
        result
    }

    /// Report an application error to the client, then terminate.
    ///
    /// Emits one `event: error` frame carrying the error's payload (see
    /// [`ErrorPayload`]), then the same terminal sequence as [`close`]. All
    /// internal failures are swallowed: whatever happens, the session ends up
    /// `closed` with the sink released. Repeated calls no-op.
    ///
    /// [`close`]: Self::close
    pub async fn error<E>(&self, err: &E)
    where
        E: ErrorPayload + ?Sized,
    {
        if self.begin_terminal().is_err() {
            return;
        }
        let _terminal = self.terminal_guard();

        let frame = SseEvent::new(err.payload().to_string()).event(reserved::ERROR);
        match self.sink.write(frame.to_bytes()).await {
            Ok(()) => {
                if let Err(err) = self.sink.write_terminal(event::end_frame()).await {
                    tracing::debug!(error = %err, "end frame not delivered");
                }
            }
            Err(err) => tracing::debug!(error = %err, "error frame not delivered"),
        }
    }

    /// Tear the stream down immediately with the default reason.
    ///
    /// No `end` frame is written and queued frames may be discarded; the
    /// reader and any write parked on backpressure resolve with a
    /// cancellation error. Preempts an in-flight graceful close. The sink
    /// stays released, so no further writer can attach.
    pub fn abort(&self) {
        self.abort_inner(AbortReason::default());
    }

    /// Tear the stream down immediately with an explicit reason.
    pub fn abort_with(&self, reason: impl Into<String>) {
        self.abort_inner(AbortReason::new(reason));
    }

    fn abort_inner(&self, reason: AbortReason) {
        if self.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return;
        }
        tracing::debug!(reason = %reason, "sse session aborted");
        self.sink.abort(reason);
    }

    fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    /// Claim the terminal sequence. Exactly one caller wins.
    fn begin_terminal(&self) -> Result<(), ()> {
        self.state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ())
    }

    async fn deliver(&self, frame: SseEvent) -> SseResult<()> {
        self.sink.write(frame.to_bytes()).await?;
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn terminal_guard(&self) -> TerminalGuard<'_> {
        TerminalGuard {
            state: &self.state,
            sink: &self.sink,
        }
    }
}

/// Finishes the terminal sequence when it unwinds, on every exit path.
///
/// The guard owns the teardown itself, not just the state flip: if the
/// `close`/`error` future is dropped while parked on backpressure, the sink is
/// still released here, so the reader always reaches end-of-stream and the
/// session never reads `closed` with the sender half alive.
struct TerminalGuard<'a> {
    state: &'a AtomicU8,
    sink: &'a StreamSink,
}

impl Drop for TerminalGuard<'_> {
    fn drop(&mut self) {
        self.sink.close();
        self.state.store(CLOSED, Ordering::Release);
    }
}

fn response_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("none"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SseError;
    use futures_util::StreamExt;
    use serde::Serializer;
    use std::sync::Arc;

    async fn drain(body: SseBody) -> String {
        let mut out = String::new();
        let mut body = body;
        while let Some(Ok(bytes)) = body.next().await {
            out.push_str(&String::from_utf8_lossy(&bytes));
        }
        out
    }

    #[tokio::test]
    async fn retry_directive_is_first_on_the_wire() {
        let config = SseConfig::new().with_retry(std::time::Duration::from_secs(1));
        let (session, mut body) = SseSession::with_config(config);

        session.write(&serde_json::json!({"message": "x"})).await.unwrap();

        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first, "retry: 1000\n");
    }

    #[tokio::test]
    async fn write_frames_match_wire_format() {
        let (session, body) = SseSession::new();

        session.write(&serde_json::json!({"message": "x"})).await.unwrap();
        session
            .write_event("custom", &serde_json::json!({"message": "x"}))
            .await
            .unwrap();
        session.sink.close();

        let wire = drain(body).await;
        assert_eq!(
            wire,
            "data: {\"message\":\"x\"}\n\nevent: custom\ndata: {\"message\":\"x\"}\n\n"
        );
    }

    #[tokio::test]
    async fn close_emits_one_end_frame() {
        let (session, body) = SseSession::new();

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(session.is_closed());

        assert_eq!(drain(body).await, "event: end\ndata: \"\"\n\n");
    }

    #[tokio::test]
    async fn concurrent_closes_emit_one_end_frame() {
        let (session, body) = SseSession::new();
        let session = Arc::new(session);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let session = session.clone();
            tasks.push(tokio::spawn(async move { session.close().await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(drain(body).await, "event: end\ndata: \"\"\n\n");
    }

    #[tokio::test]
    async fn cancelled_close_still_releases_the_sink() {
        let config = SseConfig::new().with_buffer_size(1);
        let (session, mut body) = SseSession::with_config(config);
        let session = Arc::new(session);

        session.write(&"fill").await.unwrap();

        // The close parks on the full queue; dropping its future must still
        // release the sink, or the reader hangs with neither EOF nor a fault.
        let close = tokio::spawn({
            let session = session.clone();
            async move { session.close().await }
        });
        tokio::task::yield_now().await;
        close.abort();
        let _ = close.await;

        assert!(session.is_closed());
        assert_eq!(body.next().await.unwrap().unwrap(), "data: \"fill\"\n\n");
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn write_after_close_is_a_silent_noop() {
        let (session, body) = SseSession::new();

        session.write(&"before").await.unwrap();
        session.close().await.unwrap();
        session.write(&"after").await.unwrap();

        let wire = drain(body).await;
        assert_eq!(wire, "data: \"before\"\n\nevent: end\ndata: \"\"\n\n");
        assert_eq!(session.frames_written(), 1);
    }

    #[tokio::test]
    async fn error_emits_error_then_end_exactly_once() {
        let (session, body) = SseSession::new();

        session.error("boom").await;
        session.error("boom again").await;
        assert!(session.is_closed());

        assert_eq!(
            drain(body).await,
            "event: error\ndata: \"boom\"\n\nevent: end\ndata: \"\"\n\n"
        );
    }

    #[tokio::test]
    async fn error_with_structured_payload() {
        struct Quota;

        impl std::fmt::Display for Quota {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("quota exceeded")
            }
        }

        impl ErrorPayload for Quota {
            fn structured(&self) -> Option<serde_json::Value> {
                Some(serde_json::json!({"code": 429}))
            }
        }

        let (session, body) = SseSession::new();
        session.error(&Quota).await;

        assert_eq!(
            drain(body).await,
            "event: error\ndata: {\"code\":429}\n\nevent: end\ndata: \"\"\n\n"
        );
    }

    #[tokio::test]
    async fn error_after_abort_is_a_noop() {
        let (session, _body) = SseSession::new();

        session.abort();
        session.error("too late").await;

        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn abort_fails_pending_read_with_reason() {
        let (session, mut body) = SseSession::new();

        let pending = tokio::spawn(async move { body.next().await });
        tokio::task::yield_now().await;

        session.abort_with("reason");
        assert!(session.is_closed());

        match pending.await.unwrap().unwrap().unwrap_err() {
            SseError::Aborted(reason) => assert_eq!(reason.message(), "reason"),
            other => panic!("expected abort, got {other}"),
        }
    }

    #[tokio::test]
    async fn abort_uses_default_message() {
        let (session, mut body) = SseSession::new();

        session.abort();

        match body.next().await.unwrap().unwrap_err() {
            SseError::Aborted(reason) => {
                assert_eq!(reason.message(), "Stream writer aborted.");
                assert_eq!(reason.kind(), "AbortError");
            }
            other => panic!("expected abort, got {other}"),
        }
    }

    #[tokio::test]
    async fn abort_fails_backpressured_write() {
        let config = SseConfig::new().with_buffer_size(1);
        let (session, _body) = SseSession::with_config(config);
        let session = Arc::new(session);

        session.write(&"fill").await.unwrap();

        let parked = tokio::spawn({
            let session = session.clone();
            async move { session.write(&"parked").await }
        });
        tokio::task::yield_now().await;

        session.abort_with("client gone");

        match parked.await.unwrap().unwrap_err() {
            SseError::Aborted(reason) => assert_eq!(reason.message(), "client gone"),
            other => panic!("expected abort, got {other}"),
        }
    }

    #[tokio::test]
    async fn serialization_failure_surfaces_and_leaves_session_open() {
        struct NotJson;

        impl Serialize for NotJson {
            fn serialize<S: Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("unsupported value"))
            }
        }

        let (session, _body) = SseSession::new();

        let err = session.write(&NotJson).await.unwrap_err();
        assert!(matches!(err, SseError::Serialization(_)));
        assert!(!session.is_closed());
        assert_eq!(session.frames_written(), 0);
    }

    #[tokio::test]
    async fn try_write_reports_full_queue() {
        let config = SseConfig::new().with_buffer_size(1);
        let (session, _body) = SseSession::with_config(config);

        session.try_write(&"fits").unwrap();
        let err = session.try_write(&"full").unwrap_err();
        assert!(matches!(err, SseError::ChannelFull));
    }

    #[tokio::test]
    async fn comment_frames_reach_the_wire() {
        let (session, body) = SseSession::new();

        session.comment("ping").await.unwrap();
        session.sink.close();

        assert_eq!(drain(body).await, ": ping\n\n");
    }

    #[test]
    fn response_headers_cover_proxy_and_cache_directives() {
        let headers = response_headers();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(headers.get(header::CONNECTION).unwrap(), "keep-alive");
        assert_eq!(
            headers.get(header::CACHE_CONTROL).unwrap(),
            "no-cache, no-transform"
        );
        assert_eq!(headers.get("X-Accel-Buffering").unwrap(), "no");
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "none");
    }
}
