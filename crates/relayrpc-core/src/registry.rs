//! Process-wide client registry.
//!
//! A `ClientRegistry` owns the network provider, the connection manager and
//! the send hooks shared by every [`ClientTransport`] it creates. Build one
//! at startup, hand clones to the components that need transports, and call
//! [`ClientRegistry::shutdown`] once when the process winds down.
//!
//! # Initialization
//! Hooks are registered with the builder methods before the first transport
//! is created; transports snapshot the hook set at creation.
//!
//! # Shutdown
//! `shutdown` closes every connection the registry holds. Transports keep
//! existing but become unavailable, and any later `connect` fails with
//! `CLIENT_NETWORK`. Shutting down twice is a no-op.

use std::sync::Arc;

use crate::client::ClientTransport;
use crate::config::TransportConfig;
use crate::connection::ConnectionManager;
use crate::hooks::{SendHook, SendHooks};
use crate::transport::NetworkTransport;

#[derive(Clone)]
pub struct ClientRegistry {
    connections: Arc<ConnectionManager>,
    hooks: Arc<SendHooks>,
}

impl ClientRegistry {
    pub fn new(network: Arc<dyn NetworkTransport>) -> Self {
        Self {
            connections: Arc::new(ConnectionManager::new(network)),
            hooks: Arc::new(SendHooks::new()),
        }
    }

    /// Register a send hook for transports created from now on.
    pub fn with_hook(mut self, hook: Arc<dyn SendHook>) -> Self {
        Arc::make_mut(&mut self.hooks).register(hook);
        self
    }

    /// Create a transport bound to `config.provider`. No connection is
    /// opened until [`ClientTransport::connect`].
    pub fn transport(&self, config: TransportConfig) -> ClientTransport {
        let id = self.connections.next_transport_id();
        tracing::debug!(provider = %config.provider, transport = %id, reuse = %config.reuse, "transport created");
        ClientTransport::new(id, config, self.connections.clone(), self.hooks.clone())
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn hooks(&self) -> &SendHooks {
        &self.hooks
    }

    /// Close every connection and refuse new ones.
    pub async fn shutdown(&self) {
        let closed = self.connections.shutdown().await;
        tracing::info!(network = self.connections.network().name(), closed, "client registry shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.connections.is_shut_down()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("connections", &self.connections)
            .field("hooks", &self.hooks)
            .finish()
    }
}
