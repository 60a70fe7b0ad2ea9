//! The client transport: one instance per bound provider.
//!
//! Drives the four invocation modes against the network provider, tracks
//! in-flight calls and fires the send hooks. Many tasks may call `send` on
//! the same instance concurrently; the only per-call shared state is the
//! atomic in-flight counter.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::completion::{CallbackSink, Completion};
use crate::config::TransportConfig;
use crate::connection::{ConnectionManager, TransportId};
use crate::context::InvocationContext;
use crate::error::{ErrorKind, RpcError};
use crate::future::ResponseFuture;
use crate::hooks::{SendHooks, SendOutcome};
use crate::request::{InvokeType, Request, Response};
use crate::scope::CallScope;
use crate::transport::ConnectionHandle;
use crate::translate::translate;

/// Lifecycle state of a [`ClientTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Created,
    Connected,
    Disconnected,
    /// Terminal.
    Destroyed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// What [`ClientTransport::send`] hands back, per invocation mode.
#[derive(Debug)]
pub enum SendResult {
    /// Sync mode: the response.
    Response(Response),
    /// Future mode: the unfulfilled future.
    Future(ResponseFuture),
    /// Callback mode: the callback fires later.
    Dispatched,
    /// One-way mode: transmission was accepted.
    Sent,
}

impl SendResult {
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Response(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_future(self) -> Option<ResponseFuture> {
        match self {
            Self::Future(f) => Some(f),
            _ => None,
        }
    }
}

/// Client transport bound to a single provider.
pub struct ClientTransport {
    id: TransportId,
    config: Arc<TransportConfig>,
    connections: Arc<ConnectionManager>,
    hooks: Arc<SendHooks>,
    in_flight: Arc<AtomicUsize>,
    state: Mutex<TransportState>,
}

impl ClientTransport {
    pub(crate) fn new(
        id: TransportId,
        config: TransportConfig,
        connections: Arc<ConnectionManager>,
        hooks: Arc<SendHooks>,
    ) -> Self {
        Self {
            id,
            config: Arc::new(config),
            connections,
            hooks,
            in_flight: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(TransportState::Created),
        }
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Current lifecycle state. A connected transport whose connection has
    /// gone down reports `Disconnected`.
    pub fn state(&self) -> TransportState {
        match *self.lock_state() {
            TransportState::Connected if !self.is_healthy() => TransportState::Disconnected,
            state => state,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Acquire a connection. No-op if one is already healthy.
    pub async fn connect(&self) -> Result<(), RpcError> {
        self.ensure_not_destroyed()?;
        if self.is_healthy() {
            return Ok(());
        }
        self.connections.acquire(&self.config, self.id).await?;
        let raced_destroy = {
            let mut state = self.lock_state();
            if *state == TransportState::Destroyed {
                true
            } else {
                *state = TransportState::Connected;
                false
            }
        };
        if raced_destroy {
            self.release().await;
            return Err(destroyed());
        }
        Ok(())
    }

    /// Release the connection. Never fails; close errors are logged.
    pub async fn disconnect(&self) {
        self.release().await;
        let mut state = self.lock_state();
        if *state != TransportState::Destroyed {
            *state = TransportState::Disconnected;
        }
    }

    /// Disconnect for good. The transport refuses every call afterwards.
    pub async fn destroy(&self) {
        *self.lock_state() = TransportState::Destroyed;
        self.release().await;
        tracing::debug!(transport = %self.id, provider = %self.config.provider, "transport destroyed");
    }

    pub fn is_available(&self) -> bool {
        *self.lock_state() != TransportState::Destroyed && self.is_healthy()
    }

    /// Calls dispatched but not yet completed.
    pub fn current_requests(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.connection().and_then(|c| c.remote_addr())
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.connection().and_then(|c| c.local_addr())
    }

    // ── Sending ──────────────────────────────────────────────────────────────

    /// Send `request` in the given mode.
    pub async fn send(
        &self,
        request: Request,
        timeout: Duration,
        invoke_type: InvokeType,
    ) -> Result<SendResult, RpcError> {
        match invoke_type {
            InvokeType::Sync => self.sync_send(request, timeout).await.map(SendResult::Response),
            InvokeType::Future => self.future_send(request, timeout).await.map(SendResult::Future),
            InvokeType::Callback => self.callback_send(request, timeout).await.map(|()| SendResult::Dispatched),
            InvokeType::OneWay => self.oneway_send(request, timeout).await.map(|()| SendResult::Sent),
        }
    }

    /// Callback mode if the request carries a callback, future mode otherwise.
    pub async fn async_send(&self, request: Request, timeout: Duration) -> Result<SendResult, RpcError> {
        let invoke_type = if request.callback().is_some() {
            InvokeType::Callback
        } else {
            InvokeType::Future
        };
        self.send(request, timeout, invoke_type).await
    }

    /// Wait for the response, bounded by `timeout`.
    pub async fn sync_send(&self, request: Request, timeout: Duration) -> Result<Response, RpcError> {
        let conn = self.check_connection()?;
        let scope = self.enter(request, &conn, InvokeType::Sync, timeout);
        let outcome = self
            .connections
            .network()
            .send_blocking(&conn, scope.request(), scope.context(), timeout)
            .await
            .map_err(translate);
        match &outcome {
            Ok(response) => scope.finish(SendOutcome::Response(response)),
            Err(error) => scope.finish(SendOutcome::Failure(error)),
        }
        outcome
    }

    /// Dispatch and return a future that resolves with the outcome.
    pub async fn future_send(&self, request: Request, timeout: Duration) -> Result<ResponseFuture, RpcError> {
        let conn = self.check_connection()?;
        let (mut future, sink) = ResponseFuture::channel(timeout);
        let scope = self.enter(request, &conn, InvokeType::Future, timeout);
        let (request, context) = (scope.request().clone(), scope.context().clone());
        let completion = Completion::scoped(Box::new(sink), scope);
        self.dispatch(&conn, &request, &context, timeout, completion).await;
        future.mark_sent();
        Ok(future)
    }

    /// Dispatch and deliver the outcome to the request's callback.
    pub async fn callback_send(&self, request: Request, timeout: Duration) -> Result<(), RpcError> {
        let conn = self.check_connection()?;
        let Some(callback) = request.callback().cloned() else {
            return Err(RpcError::new(
                ErrorKind::ClientUndeclaredError,
                "callback mode requires a response callback on the request",
            ));
        };
        let scope = self.enter(request, &conn, InvokeType::Callback, timeout);
        let (request, context) = (scope.request().clone(), scope.context().clone());
        let completion = Completion::scoped(Box::new(CallbackSink::new(callback)), scope);
        self.dispatch(&conn, &request, &context, timeout, completion).await;
        Ok(())
    }

    /// Send without a response path. Returns once transmission is accepted.
    pub async fn oneway_send(&self, request: Request, timeout: Duration) -> Result<(), RpcError> {
        let conn = self.check_connection()?;
        let scope = self.enter(request, &conn, InvokeType::OneWay, timeout);
        let sent = self
            .connections
            .network()
            .send_oneway(&conn, scope.request(), scope.context(), timeout)
            .await
            .map_err(translate);
        match &sent {
            Ok(()) => scope.finish(SendOutcome::Sent),
            Err(error) => scope.finish(SendOutcome::Failure(error)),
        }
        sent
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Register `completion` with the provider. A dispatch failure resolves
    /// the completion, so the caller sees it on the async path.
    async fn dispatch(
        &self,
        conn: &ConnectionHandle,
        request: &Request,
        context: &InvocationContext,
        timeout: Duration,
        completion: Completion,
    ) {
        let result = self
            .connections
            .network()
            .send_with_callback(conn, request, context, timeout, completion.clone())
            .await;
        if let Err(e) = result {
            tracing::debug!(transport = %self.id, error = %e, "async dispatch failed");
            completion.complete(Err(e));
        }
    }

    /// Build the call's context, count it in flight and fire pre-send hooks.
    fn enter(
        &self,
        request: Request,
        conn: &ConnectionHandle,
        invoke_type: InvokeType,
        timeout: Duration,
    ) -> CallScope {
        let mut context = InvocationContext::for_request(&request);
        context.set_local_address(conn.local_addr());
        context.set_remote_address(conn.remote_addr());
        context.set_conn_create_time(conn.created_at());

        tracing::debug!(
            transport = %self.id,
            provider = %self.config.provider,
            service = request.target_service(),
            method = request.method_name(),
            mode = %invoke_type,
            timeout_ms = timeout.as_millis() as u64,
            "dispatching call"
        );
        let scope = CallScope::enter(
            self.in_flight.clone(),
            self.hooks.clone(),
            self.config.clone(),
            Arc::new(request),
            context,
            invoke_type,
        );
        scope.before_send();
        scope
    }

    /// The live connection calls may be sent on.
    fn check_connection(&self) -> Result<ConnectionHandle, RpcError> {
        self.ensure_not_destroyed()?;
        let Some(conn) = self.connection() else {
            return Err(RpcError::network(format!(
                "connection is null for {}",
                self.config.provider
            )));
        };
        if !self.connections.network().is_live(&conn) {
            return Err(RpcError::network(format!(
                "connection is not fine for {}",
                self.config.provider
            )));
        }
        Ok(conn)
    }

    async fn release(&self) {
        if let Err(e) = self.connections.release(&self.config, self.id).await {
            tracing::warn!(transport = %self.id, provider = %self.config.provider, error = %e, "disconnect failed");
        }
    }

    fn connection(&self) -> Option<ConnectionHandle> {
        self.connections.handle(&self.config, self.id)
    }

    fn is_healthy(&self) -> bool {
        self.connections.is_healthy(&self.config, self.id)
    }

    fn ensure_not_destroyed(&self) -> Result<(), RpcError> {
        if *self.lock_state() == TransportState::Destroyed {
            return Err(destroyed());
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        let Some(handle) = self.connections.detach(&self.config, self.id) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let connections = self.connections.clone();
                let provider = self.config.provider.clone();
                runtime.spawn(async move {
                    if let Err(e) = connections.close_handle(&provider, &handle).await {
                        tracing::warn!(error = %e, "closing connection of dropped transport failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    transport = %self.id,
                    conn = handle.id(),
                    "transport dropped outside a runtime, connection left to the provider"
                );
            }
        }
    }
}

impl fmt::Debug for ClientTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTransport")
            .field("id", &self.id)
            .field("provider", &self.config.provider)
            .field("reuse", &self.config.reuse)
            .field("in_flight", &self.current_requests())
            .finish()
    }
}

fn destroyed() -> RpcError {
    RpcError::network("transport is destroyed")
}
