//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound connect, read and write phases independently
//! - Bound idle gaps inside streamed bodies without buffering them
//! - Recover which phase expired from a transport error chain
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Bytes;
use http_body::{Body, Frame, SizeHint};
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};

use crate::error::ProxyError;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The upstream exchange phase a budget applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Read,
    Write,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Connect => "connect",
            Phase::Read => "read",
            Phase::Write => "write",
        })
    }
}

/// Error yielded by a [`TimedBody`] whose idle budget elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseElapsed(pub Phase);

impl fmt::Display for PhaseElapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} phase timed out", self.0)
    }
}

impl StdError for PhaseElapsed {}

/// Run `fut` under `budget`, mapping expiry to [`ProxyError::Timeout`].
pub async fn within<F: Future>(
    phase: Phase,
    budget: Duration,
    fut: F,
) -> Result<F::Output, ProxyError> {
    tokio::time::timeout(budget, fut)
        .await
        .map_err(|_| ProxyError::Timeout { phase })
}

/// Walk an error's source chain looking for a [`PhaseElapsed`].
pub fn elapsed_phase(err: &(dyn StdError + 'static)) -> Option<Phase> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(elapsed) = e.downcast_ref::<PhaseElapsed>() {
            return Some(elapsed.0);
        }
        current = e.source();
    }
    None
}

/// A body that fails when the gap between two frames exceeds `idle`.
///
/// Optionally signals a oneshot once the stream ends or the body is
/// dropped, and can carry a guard that lives as long as the body.
pub struct TimedBody<B> {
    inner: Pin<Box<B>>,
    phase: Phase,
    idle: Duration,
    sleep: Pin<Box<Sleep>>,
    done: Option<oneshot::Sender<()>>,
    _guard: Option<Box<dyn Send + Sync>>,
}

impl<B> TimedBody<B> {
    pub fn new(inner: B, phase: Phase, idle: Duration) -> Self {
        Self {
            inner: Box::pin(inner),
            phase,
            idle,
            sleep: Box::pin(tokio::time::sleep(idle)),
            done: None,
            _guard: None,
        }
    }

    /// Returns a receiver resolved when the body has been fully consumed
    /// (or dropped by its consumer).
    pub fn on_done(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.done = Some(tx);
        rx
    }

    /// Keep `guard` alive until this body is dropped.
    pub fn with_guard(mut self, guard: impl Send + Sync + 'static) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }
}

impl<B> Body for TimedBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = &mut *self;
        match this.inner.as_mut().poll_frame(cx) {
            Poll::Ready(frame) => {
                let deadline = Instant::now() + this.idle;
                this.sleep.as_mut().reset(deadline);
                match frame {
                    None => {
                        if let Some(done) = this.done.take() {
                            let _ = done.send(());
                        }
                        Poll::Ready(None)
                    }
                    Some(Ok(frame)) => Poll::Ready(Some(Ok(frame))),
                    Some(Err(e)) => Poll::Ready(Some(Err(e.into()))),
                }
            }
            Poll::Pending => match this.sleep.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Some(Err(Box::new(PhaseElapsed(this.phase))))),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
