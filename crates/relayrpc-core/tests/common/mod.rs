//! Scripted in-memory network provider shared by the integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::json;

use relayrpc_core::{
    Completion, ConnectOptions, Connection, ConnectionHandle, InvocationContext, NetworkTransport,
    ProviderDescriptor, ProviderError, Request, Response, TransportConfig,
};

/// How the scripted provider answers the next calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// Echo the method name after `delay`.
    Reply { delay: Duration },
    /// Never answer; the deadline fires.
    Silent,
    /// Reject with a server-busy signal.
    Busy,
    /// Refuse to start transmission.
    RefuseSend,
    /// Accept the completion and drop it without resolving.
    DropCompletion,
}

pub struct MockConn {
    id: u64,
    live: AtomicBool,
    remote: SocketAddr,
    created_at: SystemTime,
}

impl MockConn {
    pub fn kill(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

impl Connection for MockConn {
    fn id(&self) -> u64 {
        self.id
    }
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
    fn local_addr(&self) -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], 40000 + self.id as u16)))
    }
    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }
    fn created_at(&self) -> SystemTime {
        self.created_at
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct ScriptedNetwork {
    behavior: Mutex<Behavior>,
    dispatch_delay: Mutex<Duration>,
    next_id: AtomicU64,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub oneway_sent: AtomicUsize,
    pub refuse_open: AtomicBool,
    pub last_headers: Mutex<HashMap<String, String>>,
    pub last_options: Mutex<Option<ConnectOptions>>,
}

impl ScriptedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(Behavior::Reply { delay: Duration::ZERO }),
            dispatch_delay: Mutex::new(Duration::ZERO),
            next_id: AtomicU64::new(1),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            oneway_sent: AtomicUsize::new(0),
            refuse_open: AtomicBool::new(false),
            last_headers: Mutex::new(HashMap::new()),
            last_options: Mutex::new(None),
        })
    }

    pub fn script(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Make `send_with_callback` take `delay` before it returns.
    pub fn delay_dispatch(&self, delay: Duration) {
        *self.dispatch_delay.lock().unwrap() = delay;
    }

    fn behavior(&self) -> Behavior {
        self.behavior.lock().unwrap().clone()
    }

    fn record(&self, ctx: &InvocationContext) {
        *self.last_headers.lock().unwrap() = ctx.headers().clone();
    }
}

fn reply(request: &Request) -> Response {
    Response::ok(json!({ "method": request.method_name(), "args": request.args() }))
}

fn timed_out(timeout: Duration) -> ProviderError {
    ProviderError::Timeout { ms: timeout.as_millis() as u64 }
}

#[async_trait]
impl NetworkTransport for ScriptedNetwork {
    async fn open(
        &self,
        provider: &ProviderDescriptor,
        options: &ConnectOptions,
    ) -> Result<ConnectionHandle, ProviderError> {
        if self.refuse_open.load(Ordering::SeqCst) {
            return Err(ProviderError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        *self.last_options.lock().unwrap() = Some(options.clone());
        self.opened.fetch_add(1, Ordering::SeqCst);
        let remote = provider
            .address()
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([10, 0, 0, 1], provider.port())));
        Ok(Arc::new(MockConn {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            live: AtomicBool::new(true),
            remote,
            created_at: SystemTime::now(),
        }))
    }

    async fn close(&self, conn: &ConnectionHandle) -> Result<(), ProviderError> {
        if let Some(c) = conn.as_any().downcast_ref::<MockConn>() {
            c.kill();
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_blocking(
        &self,
        _conn: &ConnectionHandle,
        request: &Request,
        ctx: &InvocationContext,
        timeout: Duration,
    ) -> Result<Response, ProviderError> {
        self.record(ctx);
        match self.behavior() {
            Behavior::Reply { delay } if delay <= timeout => {
                tokio::time::sleep(delay).await;
                Ok(reply(request))
            }
            Behavior::Reply { .. } | Behavior::Silent | Behavior::DropCompletion => {
                tokio::time::sleep(timeout).await;
                Err(timed_out(timeout))
            }
            Behavior::Busy => Err(ProviderError::ServerBusy("queue full".into())),
            Behavior::RefuseSend => Err(ProviderError::SendFailed("write buffer closed".into())),
        }
    }

    async fn send_with_callback(
        &self,
        _conn: &ConnectionHandle,
        request: &Request,
        ctx: &InvocationContext,
        timeout: Duration,
        completion: Completion,
    ) -> Result<(), ProviderError> {
        self.record(ctx);
        let dispatch_delay = *self.dispatch_delay.lock().unwrap();
        if !dispatch_delay.is_zero() {
            tokio::time::sleep(dispatch_delay).await;
        }
        let response = reply(request);
        match self.behavior() {
            Behavior::RefuseSend => return Err(ProviderError::SendFailed("write buffer closed".into())),
            Behavior::DropCompletion => drop(completion),
            Behavior::Busy => {
                tokio::spawn(async move {
                    completion.complete(Err(ProviderError::ServerBusy("queue full".into())));
                });
            }
            Behavior::Reply { delay } if delay <= timeout => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    completion.complete(Ok(response));
                });
            }
            Behavior::Reply { .. } | Behavior::Silent => {
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    completion.complete(Err(timed_out(timeout)));
                });
            }
        }
        Ok(())
    }

    async fn send_oneway(
        &self,
        _conn: &ConnectionHandle,
        _request: &Request,
        ctx: &InvocationContext,
        _timeout: Duration,
    ) -> Result<(), ProviderError> {
        self.record(ctx);
        if self.behavior() == Behavior::RefuseSend {
            return Err(ProviderError::SendFailed("write buffer closed".into()));
        }
        self.oneway_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn config() -> TransportConfig {
    TransportConfig::new(ProviderDescriptor::new("10.0.0.1", 12200, "relay"))
}

pub fn request(method: &str) -> Request {
    Request::new("com.acme.EchoService:1.0", method, vec![json!("hello")])
}

/// Kill the connection behind `handle` without telling the manager.
pub fn kill(handle: &ConnectionHandle) {
    handle
        .as_any()
        .downcast_ref::<MockConn>()
        .expect("mock connection")
        .kill();
}
