//! ResponseFuture: the pending side of a future-mode call.
//!
//! The first resolution wins. Once the future is cancelled, a late
//! completion from the network provider finds the channel closed and is
//! discarded; once a completion has landed, `cancel` returns `false`.
//! Cancelling only stops local waiting, the remote side may still execute.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::completion::{CompletionSink, Outcome};
use crate::error::{ErrorKind, RpcError};
use crate::request::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Cancelled,
    Consumed,
}

/// Future resolving to the response of a future-mode call.
#[derive(Debug)]
pub struct ResponseFuture {
    rx: oneshot::Receiver<Outcome>,
    ready: Option<Outcome>,
    state: State,
    timeout: Duration,
    created_at: Instant,
    sent_at: Option<Instant>,
}

/// Completion sink fulfilling a [`ResponseFuture`].
pub(crate) struct FutureSink {
    tx: oneshot::Sender<Outcome>,
}

impl CompletionSink for FutureSink {
    fn deliver(self: Box<Self>, outcome: Outcome) {
        if self.tx.send(outcome).is_err() {
            tracing::debug!("future cancelled or dropped, discarding completion");
        }
    }
}

impl ResponseFuture {
    /// Create an unfulfilled future and the sink that fulfills it.
    pub(crate) fn channel(timeout: Duration) -> (Self, FutureSink) {
        let (tx, rx) = oneshot::channel();
        let future = Self {
            rx,
            ready: None,
            state: State::Pending,
            timeout,
            created_at: Instant::now(),
            sent_at: None,
        };
        (future, FutureSink { tx })
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent_at = Some(Instant::now());
    }

    /// The timeout the call was dispatched with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// When the request was handed to the network provider.
    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    /// Time since dispatch (or since creation if never dispatched).
    pub fn elapsed(&self) -> Duration {
        self.sent_at.unwrap_or(self.created_at).elapsed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == State::Cancelled
    }

    /// Returns `true` once the future has resolved or been cancelled.
    pub fn is_done(&mut self) -> bool {
        self.poll_ready();
        self.ready.is_some() || self.state != State::Pending
    }

    /// Stop waiting for the result.
    ///
    /// Returns `false` if the future had already resolved.
    pub fn cancel(&mut self) -> bool {
        self.poll_ready();
        if self.ready.is_some() || self.state != State::Pending {
            return false;
        }
        self.rx.close();
        // A completion may have landed between the check and the close.
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.ready = Some(outcome);
                false
            }
            Err(_) => {
                self.state = State::Cancelled;
                true
            }
        }
    }

    /// Take the outcome without waiting, if the future is done.
    pub fn try_take(&mut self) -> Option<Result<Response, RpcError>> {
        self.poll_ready();
        match self.state {
            State::Cancelled => Some(Err(cancelled())),
            State::Consumed => None,
            State::Pending => {
                let outcome = self.ready.take()?;
                self.state = State::Consumed;
                Some(outcome)
            }
        }
    }

    /// Wait at most `limit` for the outcome.
    ///
    /// Elapsing yields `TIMEOUT` but leaves the future usable.
    pub async fn wait(&mut self, limit: Duration) -> Result<Response, RpcError> {
        match tokio::time::timeout(limit, &mut *self).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::new(
                ErrorKind::Timeout,
                format!("waited {}ms for the response future", limit.as_millis()),
            )),
        }
    }

    fn poll_ready(&mut self) {
        if self.state != State::Pending || self.ready.is_some() {
            return;
        }
        match self.rx.try_recv() {
            Ok(outcome) => self.ready = Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => {
                self.ready = Some(Err(sink_dropped()));
            }
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, RpcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.state {
            State::Cancelled => return Poll::Ready(Err(cancelled())),
            State::Consumed => {
                return Poll::Ready(Err(RpcError::new(
                    ErrorKind::ClientUndeclaredError,
                    "response future polled after completion",
                )))
            }
            State::Pending => {}
        }
        if let Some(outcome) = this.ready.take() {
            this.state = State::Consumed;
            return Poll::Ready(outcome);
        }
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => {
                this.state = State::Consumed;
                Poll::Ready(outcome)
            }
            Poll::Ready(Err(_)) => {
                this.state = State::Consumed;
                Poll::Ready(Err(sink_dropped()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

fn cancelled() -> RpcError {
    RpcError::new(ErrorKind::ClientUndeclaredError, "invocation cancelled")
}

fn sink_dropped() -> RpcError {
    RpcError::network("response channel closed before completion")
}
