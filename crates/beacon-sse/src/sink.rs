//! The backpressured byte pipe between a session and its HTTP response body.
//!
//! [`pipe`] builds the two halves: a [`StreamSink`] (write side, exclusively
//! owned by the session) and an [`SseBody`] (read side, handed to the HTTP
//! layer). The pipe is a bounded channel, so a writer suspends once the reader
//! falls behind by more than the configured buffer.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval};

use crate::config::SseConfig;
use crate::error::{AbortReason, SseError, SseResult};
use crate::event::Comment;

/// Build a connected sink/body pair for one session.
pub(crate) fn pipe(config: &SseConfig) -> (StreamSink, SseBody) {
    let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
    let abort = Arc::new(OnceLock::new());
    let (cancel, _) = watch::channel(false);

    // First tick lands one full period out, so an idle connection is not
    // greeted with a heartbeat before any real frame.
    let keep_alive = config
        .keep_alive
        .map(|period| interval_at(Instant::now() + period, period));

    let sink = StreamSink {
        inner: Mutex::new(Inner {
            tx: Some(tx),
            sealed: false,
        }),
        abort: abort.clone(),
        cancel,
    };

    let body = SseBody {
        rx,
        abort,
        keep_alive,
        done: false,
    };

    (sink, body)
}

/// Mutable half of the sink, guarded by one lock so that sealing and the
/// terminal-frame commit are a single atomic step.
struct Inner {
    /// Sender half; taken on close/abort so no further write is structurally
    /// possible.
    tx: Option<mpsc::Sender<Bytes>>,
    /// Set together with the terminal frame's commit. Every commit re-checks
    /// it under the lock, so no frame can land after the terminal one.
    sealed: bool,
}

/// Write side of the pipe.
///
/// Single-writer by construction: the owning session is the only component
/// holding it. Writes reserve queue capacity first and commit under the inner
/// lock; releasing the sender half is how `close` signals end-of-stream, and
/// the abort cell is how `abort` turns that same teardown into a fault the
/// reader can observe.
pub(crate) struct StreamSink {
    inner: Mutex<Inner>,
    /// Set exactly once, before the sender is dropped, so a woken reader or
    /// writer sees the reason.
    abort: Arc<OnceLock<AbortReason>>,
    /// Flipped on abort to resolve writes parked on backpressure.
    cancel: watch::Sender<bool>,
}

impl StreamSink {
    /// Forward encoded bytes, suspending until the bounded queue accepts them
    /// or the sink is torn down.
    pub(crate) async fn write(&self, bytes: Bytes) -> SseResult<()> {
        self.send(bytes, false).await
    }

    /// Forward the terminal frame: its commit also seals the sink, so no
    /// later frame can be enqueued behind it.
    pub(crate) async fn write_terminal(&self, bytes: Bytes) -> SseResult<()> {
        self.send(bytes, true).await
    }

    async fn send(&self, bytes: Bytes, seal: bool) -> SseResult<()> {
        let tx = {
            let inner = self.inner.lock();
            match &inner.tx {
                Some(tx) if !inner.sealed => tx.clone(),
                _ => return Err(self.released_error()),
            }
        };

        let mut cancelled = self.cancel.subscribe();
        let permit = tokio::select! {
            biased;
            _ = cancelled.wait_for(|flag| *flag) => Err(self.released_error()),
            permit = tx.reserve() => permit.map_err(|_| self.released_error()),
        }?;

        let mut inner = self.inner.lock();
        if inner.sealed {
            return Err(self.released_error());
        }
        inner.sealed = seal;
        permit.send(bytes);
        Ok(())
    }

    /// Forward encoded bytes without suspending.
    pub(crate) fn write_now(&self, bytes: Bytes) -> SseResult<()> {
        let inner = self.inner.lock();
        let Some(tx) = inner.tx.as_ref().filter(|_| !inner.sealed) else {
            return Err(self.released_error());
        };

        let result = match tx.try_reserve() {
            Ok(permit) => {
                permit.send(bytes);
                Ok(())
            }
            Err(TrySendError::Full(())) => Err(SseError::ChannelFull),
            Err(TrySendError::Closed(())) => Err(self.released_error()),
        };
        result
    }

    /// Seal the sink and release the sender half. Frames already queued still
    /// drain to the reader, which then observes a clean end-of-stream.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        inner.tx.take();
    }

    /// Tear the pipe down with a cancellation reason.
    ///
    /// The reason is published before the sender is dropped; the reader and
    /// any parked writer resolve with the same [`SseError::Aborted`].
    pub(crate) fn abort(&self, reason: AbortReason) {
        let _ = self.abort.set(reason);
        self.close();
        let _ = self.cancel.send(true);
    }

    /// Error describing why the pipe no longer accepts writes.
    fn released_error(&self) -> SseError {
        self.abort.get().map_or_else(
            || SseError::sink_closed("sink released"),
            |reason| SseError::Aborted(reason.clone()),
        )
    }
}

/// Readable side of one SSE connection, attached as the HTTP response body.
///
/// Yields encoded frames in write order. Ends with a clean end-of-stream after
/// a graceful close, or with a single [`SseError::Aborted`] after an abort.
pub struct SseBody {
    rx: mpsc::Receiver<Bytes>,
    abort: Arc<OnceLock<AbortReason>>,
    keep_alive: Option<Interval>,
    done: bool,
}

impl Stream for SseBody {
    type Item = Result<Bytes, SseError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        // Abort preempts anything still queued.
        if let Some(reason) = self.abort.get() {
            let reason = reason.clone();
            self.done = true;
            self.rx.close();
            return Poll::Ready(Some(Err(SseError::Aborted(reason))));
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(bytes)) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => {
                if let Some(keep_alive) = self.keep_alive.as_mut() {
                    if keep_alive.poll_tick(cx).is_ready() {
                        return Poll::Ready(Some(Ok(Comment::new("keep-alive").to_bytes())));
                    }
                }
                Poll::Pending
            }
        }
    }
}
