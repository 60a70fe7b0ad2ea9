//! Per-transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::ProviderDescriptor;

/// Whether a connection handle is shared by every transport bound to the
/// same provider, or private to one transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReusePolicy {
    #[default]
    Shared,
    Dedicated,
}

impl std::fmt::Display for ReusePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Dedicated => write!(f, "dedicated"),
        }
    }
}

/// Resolved configuration a client transport is built from. Read-only to
/// the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// The already-selected remote endpoint.
    pub provider: ProviderDescriptor,
    /// Upper bound for establishing a connection, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Desired number of underlying connections per handle.
    #[serde(default = "default_connection_num")]
    pub connection_num: usize,
    /// Connection reuse policy.
    #[serde(default)]
    pub reuse: ReusePolicy,
    /// Record connection metadata into the invocation context attachments.
    #[serde(default = "bool_true")]
    pub attachments: bool,
}

fn default_connect_timeout_ms() -> u64 { 5_000 }
fn default_connection_num() -> usize { 1 }
fn bool_true() -> bool { true }

impl TransportConfig {
    /// Default configuration for `provider`.
    pub fn new(provider: ProviderDescriptor) -> Self {
        Self {
            provider,
            connect_timeout_ms: default_connect_timeout_ms(),
            connection_num: default_connection_num(),
            reuse: ReusePolicy::default(),
            attachments: true,
        }
    }

    pub fn with_reuse(mut self, reuse: ReusePolicy) -> Self {
        self.reuse = reuse;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connection_num(mut self, n: usize) -> Self {
        self.connection_num = n;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `connection_num`, never less than one.
    pub fn effective_connection_num(&self) -> usize {
        self.connection_num.max(1)
    }
}
