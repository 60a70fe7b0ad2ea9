//! Wire frames: one JSON object per line.
//!
//! ```text
//! {"type":"request","id":7,"oneway":false,"headers":{...},"service":"echo.Service","method":"echo","args":["hi"],"timeout_ms":3000}
//! {"type":"response","id":7,"result":"hi"}
//! {"type":"response","id":8,"error":{"kind":"SERVER_BUSY","message":"queue full"}}
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use relayrpc_core::{AppFault, ErrorKind, ProviderError, Response, RpcError, Side};

/// A transport-level failure reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Map a server-reported failure onto the provider-level condition.
    pub fn into_provider_error(self, timeout_ms: u64) -> ProviderError {
        match self.kind {
            ErrorKind::Timeout => ProviderError::Timeout { ms: timeout_ms },
            ErrorKind::ServerBusy => ProviderError::ServerBusy(self.message),
            ErrorKind::ServerSerialize => ProviderError::Serialization {
                side: Side::Server,
                message: self.message,
            },
            ErrorKind::ServerDeserialize => ProviderError::Deserialization {
                side: Side::Server,
                message: self.message,
            },
            ErrorKind::ServerUndeclaredError => ProviderError::ServerException(self.message),
            kind => ProviderError::Rpc(RpcError::new(kind, self.message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: u64,
        #[serde(default)]
        oneway: bool,
        #[serde(default)]
        headers: HashMap<String, String>,
        service: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
        timeout_ms: u64,
    },
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fault: Option<AppFault>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
}

impl Frame {
    pub fn id(&self) -> u64 {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => *id,
        }
    }

    /// A successful response frame.
    pub fn reply(id: u64, result: Value) -> Self {
        Self::Response {
            id,
            result: Some(result),
            fault: None,
            error: None,
        }
    }

    /// A response frame carrying a transport-level failure.
    pub fn failure(id: u64, error: WireError) -> Self {
        Self::Response {
            id,
            result: None,
            fault: None,
            error: Some(error),
        }
    }

    /// Serialize to one line, newline included.
    pub fn encode(&self) -> Result<String, ProviderError> {
        let mut line = serde_json::to_string(self).map_err(|e| ProviderError::Serialization {
            side: Side::Client,
            message: e.to_string(),
        })?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, ProviderError> {
        serde_json::from_str(line.trim_end()).map_err(|e| ProviderError::Deserialization {
            side: Side::Client,
            message: e.to_string(),
        })
    }

    /// Turn a response frame into the call's outcome.
    pub fn into_outcome(self, timeout_ms: u64) -> Option<Result<Response, ProviderError>> {
        match self {
            Self::Request { .. } => None,
            Self::Response {
                error: Some(error), ..
            } => Some(Err(error.into_provider_error(timeout_ms))),
            Self::Response { result, fault, .. } => Some(Ok(Response { result, fault })),
        }
    }
}
