//! Error types: the closed RPC error taxonomy and the provider-level
//! conditions it is derived from.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared, cloneable error cause kept for diagnostics.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The closed set of RPC error categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The call exceeded its deadline.
    Timeout,
    /// The remote endpoint signaled overload.
    ServerBusy,
    /// Payload encoding failed before leaving this process.
    ClientSerialize,
    /// Payload encoding failed on the remote side.
    ServerSerialize,
    /// Payload decoding failed in this process.
    ClientDeserialize,
    /// Payload decoding failed on the remote side.
    ServerDeserialize,
    /// The connection was missing, dropped, or transmission could not start.
    ClientNetwork,
    /// The remote raised a fault it did not declare.
    ServerUndeclaredError,
    /// Any other local fault.
    ClientUndeclaredError,
}

impl ErrorKind {
    /// All categories, in code order.
    pub const ALL: [ErrorKind; 9] = [
        Self::ServerBusy,
        Self::ServerSerialize,
        Self::ServerDeserialize,
        Self::ServerUndeclaredError,
        Self::Timeout,
        Self::ClientSerialize,
        Self::ClientDeserialize,
        Self::ClientNetwork,
        Self::ClientUndeclaredError,
    ];

    /// Stable numeric code. Server-side categories are `1xx`, client-side `2xx`.
    pub fn code(&self) -> u16 {
        match self {
            Self::ServerBusy => 100,
            Self::ServerSerialize => 120,
            Self::ServerDeserialize => 130,
            Self::ServerUndeclaredError => 199,
            Self::Timeout => 200,
            Self::ClientSerialize => 220,
            Self::ClientDeserialize => 230,
            Self::ClientNetwork => 250,
            Self::ClientUndeclaredError => 299,
        }
    }

    /// Look a category up by its numeric code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    /// Returns `true` if the fault was raised by the remote endpoint.
    pub fn is_server_side(&self) -> bool {
        self.code() < 200
    }

    /// Returns `true` if a caller-side routing layer may retry the call
    /// against the same or another provider.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ServerBusy | Self::ClientNetwork)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::ServerBusy => "SERVER_BUSY",
            Self::ClientSerialize => "CLIENT_SERIALIZE",
            Self::ServerSerialize => "SERVER_SERIALIZE",
            Self::ClientDeserialize => "CLIENT_DESERIALIZE",
            Self::ServerDeserialize => "SERVER_DESERIALIZE",
            Self::ClientNetwork => "CLIENT_NETWORK",
            Self::ServerUndeclaredError => "SERVER_UNDECLARED_ERROR",
            Self::ClientUndeclaredError => "CLIENT_UNDECLARED_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorized RPC failure.
///
/// Carries the category, a human-readable message and, when the failure
/// was translated from a lower layer, the original cause.
#[derive(Debug, Clone, Error)]
#[error("[{kind}] {message}")]
pub struct RpcError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Cause>,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Build an error that keeps `cause` for diagnostics.
    pub fn with_cause(kind: ErrorKind, message: impl Into<String>, cause: Cause) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: Some(cause),
        }
    }

    /// Shorthand for a `CLIENT_NETWORK` error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ClientNetwork, message)
    }

    /// Shorthand for a `TIMEOUT` error.
    pub fn timeout(ms: u64) -> Self {
        Self::new(ErrorKind::Timeout, format!("invocation timed out after {ms}ms"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The underlying failure this error was translated from, if any.
    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl PartialEq for RpcError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

/// Which side of the call raised a codec failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Client,
    Server,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Failures reported by a network transport provider.
///
/// These are the raw conditions; callers never see them directly, they
/// are passed through [`crate::translate`] first.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The call exceeded the deadline supplied at send time.
    #[error("invocation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The remote endpoint rejected the call because it is overloaded.
    #[error("server busy: {0}")]
    ServerBusy(String),

    /// Encoding the payload failed.
    #[error("{side}-side serialization failed: {message}")]
    Serialization { side: Side, message: String },

    /// Decoding the payload failed.
    #[error("{side}-side deserialization failed: {message}")]
    Deserialization { side: Side, message: String },

    /// The connection dropped before or while sending.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Transmission could not be initiated.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The remote raised a runtime fault it did not declare.
    #[error("server exception: {0}")]
    ServerException(String),

    /// Socket-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure that already carries an RPC category.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Anything the provider could not classify.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl ProviderError {
    /// Wrap an arbitrary error as an unclassified provider failure.
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self::Other(err.into())
    }
}
