//! Completion sinks: the single abstraction the client core dispatches to
//! for "deliver a result later", realized as a user callback or a future.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{ProviderError, RpcError};
use crate::hooks::{panic_message, SendOutcome};
use crate::request::Response;
use crate::scope::CallScope;
use crate::translate::translate;

/// Outcome delivered to a completion sink.
pub type Outcome = Result<Response, RpcError>;

/// Caller-supplied callback for callback-mode calls.
///
/// Exactly one of the two methods fires, once, on a task owned by the
/// network provider.
pub trait ResponseCallback: Send + Sync + 'static {
    /// The call completed; the response may still carry an app fault.
    fn on_response(&self, response: Response);

    /// The call failed with a categorized error.
    fn on_failure(&self, error: RpcError);
}

/// Something that consumes the outcome of exactly one call.
pub trait CompletionSink: Send + 'static {
    fn deliver(self: Box<Self>, outcome: Outcome);
}

impl<F> CompletionSink for F
where
    F: FnOnce(Outcome) + Send + 'static,
{
    fn deliver(self: Box<Self>, outcome: Outcome) {
        (*self)(outcome)
    }
}

/// Forwards the outcome to a [`ResponseCallback`], containing panics.
pub(crate) struct CallbackSink {
    callback: Arc<dyn ResponseCallback>,
}

impl CallbackSink {
    pub(crate) fn new(callback: Arc<dyn ResponseCallback>) -> Self {
        Self { callback }
    }
}

impl CompletionSink for CallbackSink {
    fn deliver(self: Box<Self>, outcome: Outcome) {
        let callback = self.callback;
        let result = catch_unwind(AssertUnwindSafe(|| match outcome {
            Ok(response) => callback.on_response(response),
            Err(error) => callback.on_failure(error),
        }));
        if let Err(panic) = result {
            tracing::warn!(panic = %panic_message(&panic), "response callback panicked");
        }
    }
}

struct Pending {
    sink: Box<dyn CompletionSink>,
    scope: Option<CallScope>,
}

impl Pending {
    fn finish(self, outcome: Outcome) {
        if let Some(scope) = self.scope {
            match &outcome {
                Ok(response) => scope.finish(SendOutcome::Response(response)),
                Err(error) => scope.finish(SendOutcome::Failure(error)),
            }
        }
        self.sink.deliver(outcome);
    }
}

struct Slot {
    pending: Mutex<Option<Pending>>,
}

impl Slot {
    fn take(&self) -> Option<Pending> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        let pending = self
            .pending
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pending) = pending {
            tracing::debug!("completion dropped by the network provider without a result");
            pending.finish(Err(RpcError::network(
                "completion dropped by the network provider without a result",
            )));
        }
    }
}

/// Completion handle registered with the network provider.
///
/// Clones share one slot: the first [`Completion::complete`] wins and every
/// later one is discarded. If the last clone is dropped without completing,
/// the call resolves with `CLIENT_NETWORK`.
#[derive(Clone)]
pub struct Completion {
    slot: Arc<Slot>,
}

impl Completion {
    /// Create a completion that delivers straight into `sink`.
    pub fn new(sink: impl CompletionSink) -> Self {
        Self::build(Box::new(sink), None)
    }

    pub(crate) fn scoped(sink: Box<dyn CompletionSink>, scope: CallScope) -> Self {
        Self::build(sink, Some(scope))
    }

    fn build(sink: Box<dyn CompletionSink>, scope: Option<CallScope>) -> Self {
        Self {
            slot: Arc::new(Slot {
                pending: Mutex::new(Some(Pending { sink, scope })),
            }),
        }
    }

    /// Resolve the call. Provider failures are translated before delivery.
    ///
    /// Returns `false` if the call had already been resolved.
    pub fn complete(&self, outcome: Result<Response, ProviderError>) -> bool {
        let Some(pending) = self.slot.take() else {
            tracing::debug!("late completion discarded");
            return false;
        };
        pending.finish(outcome.map_err(translate));
        true
    }

    /// Returns `true` once the call has been resolved.
    pub fn is_completed(&self) -> bool {
        self.slot
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Arc<AtomicUsize>, Arc<Mutex<Vec<Outcome>>>, impl CompletionSink) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (c, s) = (calls.clone(), seen.clone());
        let sink = move |outcome: Outcome| {
            c.fetch_add(1, Ordering::SeqCst);
            s.lock().unwrap().push(outcome);
        };
        (calls, seen, sink)
    }

    #[test]
    fn first_completion_wins() {
        let (calls, seen, sink) = counting();
        let completion = Completion::new(sink);
        let other = completion.clone();

        assert!(completion.complete(Ok(Response::ok(serde_json::json!(1)))));
        assert!(!other.complete(Err(ProviderError::Timeout { ms: 5 })));
        assert!(other.is_completed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(seen.lock().unwrap()[0].is_ok());
    }

    #[test]
    fn failures_are_translated() {
        let (_, seen, sink) = counting();
        let completion = Completion::new(sink);
        completion.complete(Err(ProviderError::ServerBusy("full".into())));
        let outcome = seen.lock().unwrap().pop().unwrap();
        assert_eq!(outcome.unwrap_err().kind(), ErrorKind::ServerBusy);
    }

    #[test]
    fn dropped_completion_resolves_with_network_error() {
        let (calls, seen, sink) = counting();
        let completion = Completion::new(sink);
        let clone = completion.clone();
        drop(completion);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(clone);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let outcome = seen.lock().unwrap().pop().unwrap();
        assert_eq!(outcome.unwrap_err().kind(), ErrorKind::ClientNetwork);
    }

    struct Recorder {
        responses: AtomicUsize,
        failures: AtomicUsize,
    }

    impl ResponseCallback for Recorder {
        fn on_response(&self, _response: Response) {
            self.responses.fetch_add(1, Ordering::SeqCst);
        }
        fn on_failure(&self, _error: RpcError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn callback_sink_routes_outcomes() {
        let recorder = Arc::new(Recorder {
            responses: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        });
        Box::new(CallbackSink::new(recorder.clone()))
            .deliver(Ok(Response::ok(serde_json::json!(null))));
        Box::new(CallbackSink::new(recorder.clone())).deliver(Err(RpcError::timeout(1)));
        assert_eq!(recorder.responses.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.failures.load(Ordering::SeqCst), 1);
    }

    struct Panicky;

    impl ResponseCallback for Panicky {
        fn on_response(&self, _response: Response) {
            panic!("boom");
        }
        fn on_failure(&self, _error: RpcError) {}
    }

    #[test]
    fn callback_panic_is_contained() {
        let completion = Completion::build(Box::new(CallbackSink::new(Arc::new(Panicky))), None);
        assert!(completion.complete(Ok(Response::ok(serde_json::json!(1)))));
    }
}
