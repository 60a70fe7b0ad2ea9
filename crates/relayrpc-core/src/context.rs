//! Per-call invocation context.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::request::Request;

pub const HEADER_TARGET_SERVICE: &str = "rpc.target_service";
pub const HEADER_METHOD_NAME: &str = "rpc.method_name";
pub const HEADER_GENERIC_TYPE: &str = "rpc.generic_type";
pub const HEADER_SERIALIZE_TYPE: &str = "rpc.serialize_type";

/// Attachment key holding the connection creation time (ms since epoch).
pub const ATTACHMENT_CONN_CREATE_TIME: &str = "conn_create_time";

/// Ambient data of a single call.
///
/// Created fresh for every send and dropped once the call completes; it is
/// never shared between calls. Identity headers travel to the network
/// provider, attachments stay local and are visible to send hooks.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    local_address: Option<SocketAddr>,
    remote_address: Option<SocketAddr>,
    started_at: SystemTime,
    conn_create_time: Option<SystemTime>,
    headers: HashMap<String, String>,
    attachments: HashMap<String, Value>,
}

impl InvocationContext {
    /// Build a context carrying the identity headers derived from `request`.
    pub fn for_request(request: &Request) -> Self {
        let mut headers = HashMap::with_capacity(4);
        headers.insert(
            HEADER_TARGET_SERVICE.to_string(),
            request.target_service().to_string(),
        );
        headers.insert(HEADER_METHOD_NAME.to_string(), request.method_name().to_string());
        headers.insert(
            HEADER_SERIALIZE_TYPE.to_string(),
            request.serialize_type().to_string(),
        );
        if let Some(generic) = request.generic_type() {
            headers.insert(HEADER_GENERIC_TYPE.to_string(), generic.to_string());
        }
        Self {
            local_address: None,
            remote_address: None,
            started_at: SystemTime::now(),
            conn_create_time: None,
            headers,
            attachments: HashMap::new(),
        }
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_address
    }

    pub fn set_local_address(&mut self, addr: Option<SocketAddr>) {
        self.local_address = addr;
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }

    pub fn set_remote_address(&mut self, addr: Option<SocketAddr>) {
        self.remote_address = addr;
    }

    /// When the call entered the transport.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn conn_create_time(&self) -> Option<SystemTime> {
        self.conn_create_time
    }

    pub fn set_conn_create_time(&mut self, at: SystemTime) {
        self.conn_create_time = Some(at);
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn attachment(&self, key: &str) -> Option<&Value> {
        self.attachments.get(key)
    }

    pub fn attachments(&self) -> &HashMap<String, Value> {
        &self.attachments
    }

    pub fn set_attachment(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attachments.insert(key.into(), value.into());
    }

    /// Copy the connection creation time into the attachments.
    pub(crate) fn attach_conn_create_time(&mut self) {
        let Some(at) = self.conn_create_time else {
            return;
        };
        if let Ok(since_epoch) = at.duration_since(UNIX_EPOCH) {
            self.set_attachment(
                ATTACHMENT_CONN_CREATE_TIME,
                since_epoch.as_millis() as u64,
            );
        }
    }
}
