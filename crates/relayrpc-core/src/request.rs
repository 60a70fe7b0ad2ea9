//! Request / response types exchanged with a network transport provider.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::completion::ResponseCallback;
use crate::error::{ErrorKind, RpcError};

/// Request property carrying the generic-call type marker.
pub const PROP_GENERIC_TYPE: &str = "generic.type";

/// Serialization tag used when the caller does not pick one.
pub const DEFAULT_SERIALIZE_TYPE: &str = "json";

/// How a call is dispatched and how its result comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeType {
    /// Wait for the response within the timeout.
    Sync,
    /// Return immediately; the request's callback fires on completion.
    Callback,
    /// Return a [`crate::ResponseFuture`] immediately.
    Future,
    /// Fire-and-forget: no response is ever produced.
    OneWay,
}

impl fmt::Display for InvokeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Callback => write!(f, "callback"),
            Self::Future => write!(f, "future"),
            Self::OneWay => write!(f, "oneway"),
        }
    }
}

impl FromStr for InvokeType {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "callback" => Ok(Self::Callback),
            "future" => Ok(Self::Future),
            "oneway" => Ok(Self::OneWay),
            other => Err(RpcError::new(
                ErrorKind::ClientUndeclaredError,
                format!("unknown invoke type: {other}"),
            )),
        }
    }
}

/// A logical remote call.
///
/// Built by the caller once per call and never mutated by the transport.
#[derive(Clone)]
pub struct Request {
    target_service: String,
    method_name: String,
    serialize_type: String,
    args: Vec<Value>,
    callback: Option<Arc<dyn ResponseCallback>>,
    props: HashMap<String, Value>,
}

impl Request {
    /// Create a request for `method_name` on `target_service`.
    pub fn new(
        target_service: impl Into<String>,
        method_name: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            target_service: target_service.into(),
            method_name: method_name.into(),
            serialize_type: DEFAULT_SERIALIZE_TYPE.to_string(),
            args,
            callback: None,
            props: HashMap::new(),
        }
    }

    pub fn with_serialize_type(mut self, tag: impl Into<String>) -> Self {
        self.serialize_type = tag.into();
        self
    }

    /// Attach a completion callback; async sends then use callback mode.
    pub fn with_callback(mut self, callback: Arc<dyn ResponseCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Mark this as a generic call of the given type.
    pub fn with_generic_type(self, generic_type: impl Into<String>) -> Self {
        self.with_prop(PROP_GENERIC_TYPE, generic_type.into())
    }

    pub fn target_service(&self) -> &str {
        &self.target_service
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn serialize_type(&self) -> &str {
        &self.serialize_type
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn callback(&self) -> Option<&Arc<dyn ResponseCallback>> {
        self.callback.as_ref()
    }

    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }

    pub fn props(&self) -> &HashMap<String, Value> {
        &self.props
    }

    /// The generic-call type marker, if one was set as a string property.
    pub fn generic_type(&self) -> Option<&str> {
        self.prop(PROP_GENERIC_TYPE).and_then(Value::as_str)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("target_service", &self.target_service)
            .field("method_name", &self.method_name)
            .field("serialize_type", &self.serialize_type)
            .field("args", &self.args)
            .field("has_callback", &self.callback.is_some())
            .field("props", &self.props)
            .finish()
    }
}

/// An application-level fault raised by the remote method itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppFault {
    /// Fault type name as reported by the remote side.
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for AppFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The outcome of a completed call: a result payload or an app fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<AppFault>,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            fault: None,
        }
    }

    pub fn fault(fault: AppFault) -> Self {
        Self {
            result: None,
            fault: Some(fault),
        }
    }

    /// Returns `true` if the remote method did not fault.
    pub fn is_ok(&self) -> bool {
        self.fault.is_none()
    }

    /// Unwrap the result value or return the app fault.
    pub fn into_result(self) -> Result<Value, AppFault> {
        match self.fault {
            Some(fault) => Err(fault),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
