//! Pre-send / post-send notification hooks.
//!
//! Hooks are the integration point for middleware and observability.
//! A hook that returns an error or panics is logged and skipped; it never
//! changes the outcome of the call it observes.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::context::InvocationContext;
use crate::error::RpcError;
use crate::provider::ProviderDescriptor;
use crate::request::{InvokeType, Request, Response};

/// Fired after the invocation context is built, before dispatch.
#[derive(Debug)]
pub struct BeforeSend<'a> {
    pub provider: &'a ProviderDescriptor,
    pub invoke_type: InvokeType,
    pub request: &'a Request,
    pub context: &'a InvocationContext,
}

/// How a call left the transport.
#[derive(Debug, Clone, Copy)]
pub enum SendOutcome<'a> {
    /// A response arrived (sync, callback and future modes).
    Response(&'a Response),
    /// The call failed; the error is already categorized.
    Failure(&'a RpcError),
    /// A one-way call was accepted for transmission.
    Sent,
    /// The caller stopped waiting before the call resolved.
    Abandoned,
}

/// Fired exactly once per call when the call leaves the transport.
#[derive(Debug)]
pub struct AfterSend<'a> {
    pub provider: &'a ProviderDescriptor,
    pub invoke_type: InvokeType,
    pub request: &'a Request,
    pub context: &'a InvocationContext,
    pub outcome: SendOutcome<'a>,
    pub elapsed: Duration,
}

/// Observer of outbound calls.
pub trait SendHook: Send + Sync + 'static {
    fn before_send(&self, _event: &BeforeSend<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_send(&self, _event: &AfterSend<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Name used in log lines.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Ordered set of registered hooks.
#[derive(Clone, Default)]
pub struct SendHooks {
    hooks: Vec<Arc<dyn SendHook>>,
}

impl SendHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn SendHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn fire_before(&self, event: &BeforeSend<'_>) {
        for hook in &self.hooks {
            guarded(hook.as_ref(), "before_send", || hook.before_send(event));
        }
    }

    pub fn fire_after(&self, event: &AfterSend<'_>) {
        for hook in &self.hooks {
            guarded(hook.as_ref(), "after_send", || hook.after_send(event));
        }
    }
}

impl std::fmt::Debug for SendHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.name()))
            .finish()
    }
}

fn guarded(hook: &dyn SendHook, stage: &'static str, call: impl FnOnce() -> anyhow::Result<()>) {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(hook = hook.name(), stage, error = %e, "send hook failed");
        }
        Err(panic) => {
            tracing::warn!(hook = hook.name(), stage, panic = %panic_message(&panic), "send hook panicked");
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
