//! Calls waiting for a response frame on one lane.
//!
//! Each entry is resolved exactly once: by its response frame, by its
//! deadline, or by the lane going down. A blocking caller that stops waiting
//! removes its entry through [`PendingGuard`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use relayrpc_core::{Completion, ProviderError, Response};

use crate::frame::Frame;

pub(crate) type Reply = Result<Response, ProviderError>;

/// Who is waiting for a response.
pub(crate) enum Waiter {
    /// A `send_blocking` caller parked on a channel.
    Blocking(oneshot::Sender<Reply>),
    /// A completion registered through `send_with_callback`.
    Callback(Completion),
}

impl Waiter {
    pub(crate) fn resolve(self, reply: Reply) {
        match self {
            Self::Blocking(tx) => {
                // The caller gave up waiting.
                let _ = tx.send(reply);
            }
            Self::Callback(completion) => {
                completion.complete(reply);
            }
        }
    }
}

struct Entry {
    waiter: Waiter,
    timeout_ms: u64,
    deadline: Option<AbortHandle>,
}

impl Entry {
    /// Detach the waiter, stopping its deadline timer.
    fn into_waiter(self) -> Waiter {
        if let Some(timer) = self.deadline {
            timer.abort();
        }
        self.waiter
    }
}

#[derive(Clone, Default)]
pub(crate) struct PendingCalls {
    entries: Arc<Mutex<HashMap<u64, Entry>>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, id: u64, waiter: Waiter, timeout_ms: u64) {
        self.entries().insert(
            id,
            Entry {
                waiter,
                timeout_ms,
                deadline: None,
            },
        );
    }

    /// Removes call `id` when dropped, unless it was resolved first.
    pub(crate) fn guard(&self, id: u64) -> PendingGuard {
        PendingGuard {
            pending: self.clone(),
            id,
        }
    }

    /// Attach the timer task that expires call `id`. Aborted right away if
    /// the call is already gone.
    pub(crate) fn arm_deadline(&self, id: u64, timer: AbortHandle) {
        match self.entries().get_mut(&id) {
            Some(entry) => entry.deadline = Some(timer),
            None => timer.abort(),
        }
    }

    /// Remove a call without resolving it.
    pub(crate) fn take(&self, id: u64) -> Option<Waiter> {
        self.entries().remove(&id).map(Entry::into_waiter)
    }

    /// Remove a call whose deadline fired. Called from the timer task itself.
    pub(crate) fn expire(&self, id: u64) -> Option<(Waiter, u64)> {
        self.entries().remove(&id).map(|e| (e.waiter, e.timeout_ms))
    }

    /// Route a response frame to its waiter. Returns `false` for unknown ids
    /// (already timed out, or never ours).
    pub(crate) fn dispatch(&self, frame: Frame) -> bool {
        let id = frame.id();
        let Some(entry) = self.entries().remove(&id) else {
            return false;
        };
        let timeout_ms = entry.timeout_ms;
        let waiter = entry.into_waiter();
        match frame.into_outcome(timeout_ms) {
            Some(reply) => waiter.resolve(reply),
            None => waiter.resolve(Err(ProviderError::ConnectionClosed(format!(
                "peer sent a request frame in reply to call {id}"
            )))),
        }
        true
    }

    /// Fail every waiting call with `ConnectionClosed`.
    pub(crate) fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<Entry> = self.entries().drain().map(|(_, e)| e).collect();
        let n = drained.len();
        for entry in drained {
            entry
                .into_waiter()
                .resolve(Err(ProviderError::ConnectionClosed(reason.to_string())));
        }
        n
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// See [`PendingCalls::guard`].
pub(crate) struct PendingGuard {
    pending: PendingCalls,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.take(self.id);
    }
}
