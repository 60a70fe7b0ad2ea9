//! Connection lifecycle manager.
//!
//! Connections live in slots. Under [`ReusePolicy::Shared`] the slot is
//! keyed by provider identity and holds the set of transports referencing
//! it; the connection is closed when the last holder releases. Under
//! [`ReusePolicy::Dedicated`] the slot is keyed by the owning transport
//! and closed on its release.
//!
//! The manager is the only component that closes connections.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{ReusePolicy, TransportConfig};
use crate::error::{ErrorKind, RpcError};
use crate::provider::ProviderDescriptor;
use crate::transport::{ConnectOptions, ConnectionHandle, NetworkTransport};

/// Identifier of one client transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl TransportId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SlotKey {
    Shared(ProviderDescriptor),
    Dedicated(TransportId),
}

impl SlotKey {
    fn for_config(config: &TransportConfig, owner: TransportId) -> Self {
        match config.reuse {
            ReusePolicy::Shared => Self::Shared(config.provider.clone()),
            ReusePolicy::Dedicated => Self::Dedicated(owner),
        }
    }
}

#[derive(Default)]
struct SlotState {
    handle: Option<ConnectionHandle>,
    holders: HashSet<TransportId>,
}

#[derive(Default)]
struct Slot {
    /// Serializes connection establishment for this slot.
    open_lock: tokio::sync::Mutex<()>,
    state: Mutex<SlotState>,
}

impl Slot {
    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Obtains, shares and disposes of connections for client transports.
///
/// Internally synchronized; share it behind an `Arc`.
pub struct ConnectionManager {
    network: Arc<dyn NetworkTransport>,
    slots: Mutex<HashMap<SlotKey, Arc<Slot>>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl ConnectionManager {
    pub fn new(network: Arc<dyn NetworkTransport>) -> Self {
        Self {
            network,
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn network(&self) -> &Arc<dyn NetworkTransport> {
        &self.network
    }

    /// Allocate an identifier for a new transport.
    pub fn next_transport_id(&self) -> TransportId {
        TransportId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Number of live slots (open or being opened).
    pub fn slot_count(&self) -> usize {
        self.slots().len()
    }

    /// Return a live connection for `owner`, opening one if needed.
    ///
    /// Fails with `CLIENT_NETWORK` if the connection cannot be established
    /// within the configured connect timeout.
    pub async fn acquire(
        &self,
        config: &TransportConfig,
        owner: TransportId,
    ) -> Result<ConnectionHandle, RpcError> {
        self.ensure_running()?;
        let key = SlotKey::for_config(config, owner);
        let slot = self.slot(&key);

        if let Some(handle) = self.join_live(&slot, owner) {
            return Ok(handle);
        }

        let opening = slot.open_lock.lock().await;
        if let Some(handle) = self.join_live(&slot, owner) {
            return Ok(handle);
        }

        let stale = slot.state().handle.take();
        if let Some(stale) = stale {
            tracing::info!(provider = %config.provider, conn = stale.id(), "replacing unhealthy connection");
            if let Err(e) = self.network.close(&stale).await {
                tracing::debug!(error = %e, "closing stale connection failed");
            }
        }

        let handle = match self.open(config).await {
            Ok(handle) => handle,
            Err(e) => {
                drop(opening);
                self.prune(&key, slot);
                return Err(e);
            }
        };
        if self.is_shut_down() {
            if let Err(e) = self.network.close(&handle).await {
                tracing::debug!(conn = handle.id(), error = %e, "closing connection opened during shutdown failed");
            }
            return Err(RpcError::network("connection manager is shut down"));
        }

        tracing::info!(
            provider = %config.provider,
            reuse = %config.reuse,
            conn = handle.id(),
            transport = %owner,
            "connection established"
        );
        let mut state = slot.state();
        state.handle = Some(handle.clone());
        state.holders.insert(owner);
        Ok(handle)
    }

    /// Drop `owner`'s reference; closes the connection when it was the last
    /// holder (always, under the dedicated policy).
    pub async fn release(
        &self,
        config: &TransportConfig,
        owner: TransportId,
    ) -> Result<(), RpcError> {
        let Some(handle) = self.detach(config, owner) else {
            return Ok(());
        };
        self.close_handle(&config.provider, &handle).await
    }

    /// Synchronous half of [`release`](Self::release): forget `owner` and
    /// hand back the connection if it must now be closed by the caller.
    pub fn detach(&self, config: &TransportConfig, owner: TransportId) -> Option<ConnectionHandle> {
        let key = SlotKey::for_config(config, owner);
        let slot = self.existing(&key)?;
        let to_close = {
            let mut state = slot.state();
            if !state.holders.remove(&owner) {
                return None;
            }
            if state.holders.is_empty() {
                state.handle.take()
            } else {
                None
            }
        };
        self.prune(&key, slot);
        to_close
    }

    /// Returns `true` if `owner` holds a live connection.
    pub fn is_healthy(&self, config: &TransportConfig, owner: TransportId) -> bool {
        self.handle(config, owner)
            .map(|h| self.network.is_live(&h))
            .unwrap_or(false)
    }

    /// The connection `owner` currently holds, live or not.
    pub fn handle(&self, config: &TransportConfig, owner: TransportId) -> Option<ConnectionHandle> {
        let slot = self.existing(&SlotKey::for_config(config, owner))?;
        let state = slot.state();
        if !state.holders.contains(&owner) {
            return None;
        }
        state.handle.clone()
    }

    /// Close every connection and refuse further acquisitions.
    ///
    /// Returns the number of connections closed.
    pub async fn shutdown(&self) -> usize {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let drained: Vec<Arc<Slot>> = self.slots().drain().map(|(_, slot)| slot).collect();
        let mut closed = 0;
        for slot in drained {
            let handle = {
                let mut state = slot.state();
                state.holders.clear();
                state.handle.take()
            };
            if let Some(handle) = handle {
                if let Err(e) = self.network.close(&handle).await {
                    tracing::warn!(conn = handle.id(), error = %e, "close failed during shutdown");
                }
                closed += 1;
            }
        }
        tracing::info!(closed, "connection manager shut down");
        closed
    }

    pub(crate) async fn close_handle(
        &self,
        provider: &ProviderDescriptor,
        handle: &ConnectionHandle,
    ) -> Result<(), RpcError> {
        tracing::info!(provider = %provider, conn = handle.id(), "closing connection");
        self.network.close(handle).await.map_err(|e| {
            let message = format!("failed to close connection to {provider}: {e}");
            RpcError::with_cause(ErrorKind::ClientNetwork, message, Arc::new(e))
        })
    }

    async fn open(&self, config: &TransportConfig) -> Result<ConnectionHandle, RpcError> {
        let options = ConnectOptions::from_config(config);
        let provider = &config.provider;
        match tokio::time::timeout(options.connect_timeout, self.network.open(provider, &options)).await {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(e)) => {
                tracing::warn!(provider = %provider, error = %e, "connect failed");
                let message = format!("failed to connect to {provider}: {e}");
                Err(RpcError::with_cause(ErrorKind::ClientNetwork, message, Arc::new(e)))
            }
            Err(_) => {
                tracing::warn!(provider = %provider, timeout_ms = config.connect_timeout_ms, "connect timed out");
                Err(RpcError::network(format!(
                    "connect to {provider} timed out after {}ms",
                    config.connect_timeout_ms
                )))
            }
        }
    }

    /// Register `owner` on the slot's connection if it is live.
    fn join_live(&self, slot: &Slot, owner: TransportId) -> Option<ConnectionHandle> {
        let mut state = slot.state();
        let handle = state.handle.clone()?;
        if !self.network.is_live(&handle) {
            return None;
        }
        state.holders.insert(owner);
        Some(handle)
    }

    fn ensure_running(&self) -> Result<(), RpcError> {
        if self.is_shut_down() {
            return Err(RpcError::network("connection manager is shut down"));
        }
        Ok(())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<SlotKey, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &SlotKey) -> Arc<Slot> {
        self.slots().entry(key.clone()).or_default().clone()
    }

    fn existing(&self, key: &SlotKey) -> Option<Arc<Slot>> {
        self.slots().get(key).cloned()
    }

    /// Forget an empty slot nobody else is looking at.
    fn prune(&self, key: &SlotKey, slot: Arc<Slot>) {
        let mut slots = self.slots();
        let idle = {
            let state = slot.state();
            state.handle.is_none() && state.holders.is_empty()
        };
        // The map and this function hold the only references.
        if idle && Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("network", &self.network.name())
            .field("slots", &self.slot_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
