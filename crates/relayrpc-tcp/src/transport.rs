//! [`NetworkTransport`] over newline-delimited JSON frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time;

use relayrpc_core::{
    Completion, ConnectOptions, ConnectionHandle, InvocationContext, NetworkTransport,
    ProviderDescriptor, ProviderError, Request, Response,
};

use crate::connection::{Lane, TcpConnection};
use crate::frame::Frame;
use crate::pending::Waiter;

/// Configuration for the TCP provider.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Set `TCP_NODELAY` on every lane.
    pub nodelay: bool,
    /// Largest accepted inbound frame; a larger one drops the lane.
    pub max_frame_bytes: usize,
    /// Protocol tags this provider accepts.
    pub protocols: Vec<String>,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            max_frame_bytes: 4 * 1024 * 1024,
            protocols: vec!["relay".to_string(), "tcp".to_string()],
        }
    }
}

/// TCP network provider. Call deadlines are enforced here.
pub struct TcpTransport {
    config: TcpTransportConfig,
    next_conn_id: AtomicU64,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config,
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }

    /// Recover the TCP connection behind a handle.
    pub fn tcp(conn: &ConnectionHandle) -> Result<&TcpConnection, ProviderError> {
        conn.as_any()
            .downcast_ref::<TcpConnection>()
            .ok_or_else(|| ProviderError::other("connection was not opened by the tcp provider"))
    }

    /// Pick a lane, allocate a call id and encode `request` as one line.
    fn prepare<'c>(
        conn: &'c TcpConnection,
        request: &Request,
        ctx: &InvocationContext,
        timeout: Duration,
        oneway: bool,
    ) -> Result<(&'c Lane, u64, String), ProviderError> {
        let lane = conn.pick_lane()?;
        let id = conn.next_request_id();
        let frame = Frame::Request {
            id,
            oneway,
            headers: ctx.headers().clone(),
            service: request.target_service().to_string(),
            method: request.method_name().to_string(),
            args: request.args().to_vec(),
            timeout_ms: millis(timeout),
        };
        Ok((lane, id, frame.encode()?))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(TcpTransportConfig::default())
    }
}

#[async_trait]
impl NetworkTransport for TcpTransport {
    async fn open(
        &self,
        provider: &ProviderDescriptor,
        options: &ConnectOptions,
    ) -> Result<ConnectionHandle, ProviderError> {
        if !self.config.protocols.iter().any(|p| p == &options.protocol) {
            return Err(ProviderError::other(format!(
                "protocol '{}' is not served by the tcp provider",
                options.protocol
            )));
        }
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let address = provider.address();
        let conn = TcpConnection::open(id, &address, options, &self.config).await?;
        tracing::info!(conn = id, provider = %provider, lanes = conn.lane_count(), "tcp connection open");
        Ok(Arc::new(conn))
    }

    async fn close(&self, conn: &ConnectionHandle) -> Result<(), ProviderError> {
        let tcp = Self::tcp(conn)?;
        tcp.shutdown();
        tracing::debug!(conn = conn.id(), pending = tcp.pending_calls(), "tcp connection closing");
        Ok(())
    }

    async fn send_blocking(
        &self,
        conn: &ConnectionHandle,
        request: &Request,
        ctx: &InvocationContext,
        timeout: Duration,
    ) -> Result<Response, ProviderError> {
        let tcp = Self::tcp(conn)?;
        let (lane, id, line) = Self::prepare(tcp, request, ctx, timeout, false)?;
        let (tx, rx) = oneshot::channel();
        lane.pending().register(id, Waiter::Blocking(tx), millis(timeout));
        // Covers timeout, send failure and the caller dropping this future.
        let _registered = lane.pending().guard(id);
        tcp.submit(lane, line, None)?;

        match time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ProviderError::ConnectionClosed("response channel dropped".into())),
            Err(_) => Err(ProviderError::Timeout { ms: millis(timeout) }),
        }
    }

    async fn send_with_callback(
        &self,
        conn: &ConnectionHandle,
        request: &Request,
        ctx: &InvocationContext,
        timeout: Duration,
        completion: Completion,
    ) -> Result<(), ProviderError> {
        let tcp = Self::tcp(conn)?;
        let (lane, id, line) = Self::prepare(tcp, request, ctx, timeout, false)?;
        lane.pending().register(id, Waiter::Callback(completion), millis(timeout));
        if let Err(e) = tcp.submit(lane, line, None) {
            lane.pending().take(id);
            return Err(e);
        }

        let pending = lane.pending().clone();
        let timer = tokio::spawn(async move {
            time::sleep(timeout).await;
            if let Some((waiter, ms)) = pending.expire(id) {
                waiter.resolve(Err(ProviderError::Timeout { ms }));
            }
        });
        lane.pending().arm_deadline(id, timer.abort_handle());
        Ok(())
    }

    async fn send_oneway(
        &self,
        conn: &ConnectionHandle,
        request: &Request,
        ctx: &InvocationContext,
        timeout: Duration,
    ) -> Result<(), ProviderError> {
        let tcp = Self::tcp(conn)?;
        let (lane, _, line) = Self::prepare(tcp, request, ctx, timeout, true)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        tcp.submit(lane, line, Some(ack_tx))?;

        match time::timeout(timeout, ack_rx).await {
            Ok(Ok(written)) => written,
            Ok(Err(_)) => Err(ProviderError::SendFailed(format!(
                "lane {} closed before transmission",
                lane.index()
            ))),
            Err(_) => Err(ProviderError::Timeout { ms: millis(timeout) }),
        }
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
