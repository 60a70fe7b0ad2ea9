//! In-flight call scope.
//!
//! A [`CallScope`] is created when a call enters the transport and closed
//! exactly once when it leaves: either explicitly with its outcome, or on
//! drop (caller gave up, or a panic unwound through the send path).
//! Closing decrements the in-flight counter and fires the post-send hooks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::TransportConfig;
use crate::context::InvocationContext;
use crate::hooks::{AfterSend, BeforeSend, SendHooks, SendOutcome};
use crate::request::{InvokeType, Request};

pub(crate) struct CallScope {
    in_flight: Arc<AtomicUsize>,
    hooks: Arc<SendHooks>,
    config: Arc<TransportConfig>,
    request: Arc<Request>,
    context: InvocationContext,
    invoke_type: InvokeType,
    started: Instant,
    closed: bool,
}

impl CallScope {
    /// Open a scope; increments the in-flight counter.
    pub(crate) fn enter(
        in_flight: Arc<AtomicUsize>,
        hooks: Arc<SendHooks>,
        config: Arc<TransportConfig>,
        request: Arc<Request>,
        context: InvocationContext,
        invoke_type: InvokeType,
    ) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            in_flight,
            hooks,
            config,
            request,
            context,
            invoke_type,
            started: Instant::now(),
            closed: false,
        }
    }

    pub(crate) fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub(crate) fn context(&self) -> &InvocationContext {
        &self.context
    }

    pub(crate) fn before_send(&self) {
        self.hooks.fire_before(&BeforeSend {
            provider: &self.config.provider,
            invoke_type: self.invoke_type,
            request: &self.request,
            context: &self.context,
        });
    }

    /// Close the scope with the call's outcome.
    pub(crate) fn finish(mut self, outcome: SendOutcome<'_>) {
        self.close(outcome);
    }

    fn close(&mut self, outcome: SendOutcome<'_>) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.config.attachments {
            self.context.attach_conn_create_time();
        }
        self.hooks.fire_after(&AfterSend {
            provider: &self.config.provider,
            invoke_type: self.invoke_type,
            request: &self.request,
            context: &self.context,
            outcome,
            elapsed: self.started.elapsed(),
        });
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        if !self.closed {
            tracing::debug!(
                service = self.request.target_service(),
                method = self.request.method_name(),
                "call abandoned before completion"
            );
            self.close(SendOutcome::Abandoned);
        }
    }
}
