use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::task::AtomicWaker;
use futures_util::Stream;
use pin_project_lite::pin_project;

use crate::error::PipelineError;

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    waker: AtomicWaker,
}

/// Cooperative cancellation signal shared between a request's owner and the
/// chunk source it is pulling from.
///
/// Cloning yields another handle to the same signal. Cancelling is
/// idempotent and never preempts work; the source observes it on its next
/// poll.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake a pull that is currently pending.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.waker.wake();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same signal.
    #[must_use]
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn register(&self, cx: &Context<'_>) {
        self.inner.waker.register(cx.waker());
    }
}

pin_project! {
    /// Wraps a chunk source so that the first poll after cancellation yields
    /// [`PipelineError::Aborted`] and the stream then ends.
    ///
    /// The inner stream is not polled again once the token is set.
    pub struct Cancellable<S> {
        #[pin]
        inner: S,
        token: CancelToken,
        aborted: bool,
    }
}

impl<S> Cancellable<S> {
    pub fn new(inner: S, token: CancelToken) -> Self {
        Self {
            inner,
            token,
            aborted: false,
        }
    }

    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl<S, T> Stream for Cancellable<S>
where
    S: Stream<Item = Result<T, PipelineError>>,
{
    type Item = Result<T, PipelineError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.aborted {
            return Poll::Ready(None);
        }

        // Register before checking so a cancel racing with this poll still wakes us.
        this.token.register(cx);
        if this.token.is_cancelled() {
            *this.aborted = true;
            return Poll::Ready(Some(Err(PipelineError::Aborted)));
        }

        this.inner.poll_next(cx)
    }
}
