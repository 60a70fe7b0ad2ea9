//! The `NetworkTransport` trait: low-level primitives the client core
//! drives. Socket I/O, framing and payload encoding live behind it.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::completion::Completion;
use crate::config::TransportConfig;
use crate::context::InvocationContext;
use crate::error::ProviderError;
use crate::provider::ProviderDescriptor;
use crate::request::{Request, Response};

/// One open connection, as seen by the client core.
pub trait Connection: Send + Sync + 'static {
    /// Provider-assigned identifier, for logs.
    fn id(&self) -> u64;

    /// Returns `true` while the connection can carry calls.
    fn is_live(&self) -> bool;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;

    /// When the connection was established.
    fn created_at(&self) -> SystemTime;

    /// Lets a provider recover its concrete connection type.
    fn as_any(&self) -> &dyn Any;
}

/// Shared connection handle.
pub type ConnectionHandle = Arc<dyn Connection>;

/// Parameters for opening a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    /// Number of underlying connections the handle should hold (≥ 1).
    pub connection_num: usize,
    /// Protocol tag of the provider.
    pub protocol: String,
}

impl ConnectOptions {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            connection_num: config.effective_connection_num(),
            protocol: config.provider.protocol().to_string(),
        }
    }
}

/// Low-level transport primitives a network provider exposes.
///
/// # Completion
/// `send_blocking` suspends the caller until the response arrives or the
/// provider's deadline elapses. `send_with_callback` returns once the
/// request is registered; the provider later resolves the [`Completion`]
/// exactly once from its own task, including on timeout.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; one instance serves every
/// transport of a [`crate::ClientRegistry`].
#[async_trait]
pub trait NetworkTransport: Send + Sync + 'static {
    /// Establish a connection to `provider`.
    async fn open(
        &self,
        provider: &ProviderDescriptor,
        options: &ConnectOptions,
    ) -> Result<ConnectionHandle, ProviderError>;

    /// Close a connection. Pending calls on it fail.
    async fn close(&self, conn: &ConnectionHandle) -> Result<(), ProviderError>;

    /// Liveness of `conn`, without side effects.
    fn is_live(&self, conn: &ConnectionHandle) -> bool {
        conn.is_live()
    }

    /// Send and wait for the response, bounded by `timeout`.
    async fn send_blocking(
        &self,
        conn: &ConnectionHandle,
        request: &Request,
        ctx: &InvocationContext,
        timeout: Duration,
    ) -> Result<Response, ProviderError>;

    /// Send and resolve `completion` when the response arrives or `timeout`
    /// elapses.
    async fn send_with_callback(
        &self,
        conn: &ConnectionHandle,
        request: &Request,
        ctx: &InvocationContext,
        timeout: Duration,
        completion: Completion,
    ) -> Result<(), ProviderError>;

    /// Send without any response path. Returns once transmission is
    /// accepted.
    async fn send_oneway(
        &self,
        conn: &ConnectionHandle,
        request: &Request,
        ctx: &InvocationContext,
        timeout: Duration,
    ) -> Result<(), ProviderError>;

    /// Short name of the provider implementation.
    fn name(&self) -> &str;
}
