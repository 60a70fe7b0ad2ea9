//! Provider descriptor: the immutable identity of one remote endpoint.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// Protocol tag used when a descriptor does not name one.
pub const DEFAULT_PROTOCOL: &str = "relay";

/// A single remote service endpoint, identified by host, port and protocol.
///
/// Used as the identity key for connection sharing: two descriptors that
/// compare equal share a connection under the `shared` reuse policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    host: String,
    port: u16,
    #[serde(default = "default_protocol")]
    protocol: String,
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_string()
}

impl ProviderDescriptor {
    pub fn new(host: impl Into<String>, port: u16, protocol: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: protocol.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// `host:port`, suitable for socket resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl FromStr for ProviderDescriptor {
    type Err = RpcError;

    /// Parses `protocol://host:port` or `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, rest) = match s.split_once("://") {
            Some((p, rest)) if !p.is_empty() => (p, rest),
            Some(_) => return Err(invalid(s, "empty protocol")),
            None => (DEFAULT_PROTOCOL, s),
        };
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid(s, "missing port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid(s, "empty host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| invalid(s, &format!("bad port: {e}")))?;
        Ok(Self::new(host, port, protocol))
    }
}

fn invalid(input: &str, reason: &str) -> RpcError {
    RpcError::new(
        crate::error::ErrorKind::ClientUndeclaredError,
        format!("invalid provider '{input}': {reason}"),
    )
}
