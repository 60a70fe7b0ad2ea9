//! relayrpc-core: the RPC client transport engine.
//!
//! # Overview
//!
//! Turns a logical remote call into wire activity against one resolved
//! provider. The core crate defines:
//!
//! - [`ClientTransport`]: drives sync, callback, future and one-way calls
//! - [`ClientRegistry`]: process-wide owner of connections and hooks
//! - [`NetworkTransport`]: the low-level primitives a network provider exposes
//! - [`ConnectionManager`]: shared / dedicated connection lifecycle
//! - [`RpcError`] / [`ErrorKind`]: the stable error taxonomy, and
//!   [`translate`] from provider-level failures
//! - [`SendHook`]: pre-send / post-send notifications
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! # async fn demo(network: Arc<dyn relayrpc_core::NetworkTransport>) -> Result<(), relayrpc_core::RpcError> {
//! use relayrpc_core::{ClientRegistry, Request, TransportConfig};
//!
//! let registry = ClientRegistry::new(network);
//! let transport = registry.transport(TransportConfig::new("relay://10.0.0.7:12200".parse()?));
//! transport.connect().await?;
//! let response = transport
//!     .sync_send(Request::new("echo.Service", "echo", vec!["hi".into()]), Duration::from_secs(3))
//!     .await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod completion;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod future;
pub mod hooks;
pub mod provider;
pub mod registry;
pub mod request;
pub mod transport;
pub mod translate;

mod scope;

pub use client::{ClientTransport, SendResult, TransportState};
pub use completion::{Completion, CompletionSink, Outcome, ResponseCallback};
pub use config::{ReusePolicy, TransportConfig};
pub use connection::{ConnectionManager, TransportId};
pub use context::InvocationContext;
pub use error::{ErrorKind, ProviderError, RpcError, Side};
pub use future::ResponseFuture;
pub use hooks::{AfterSend, BeforeSend, SendHook, SendHooks, SendOutcome};
pub use provider::ProviderDescriptor;
pub use registry::ClientRegistry;
pub use request::{AppFault, InvokeType, Request, Response};
pub use transport::{ConnectOptions, Connection, ConnectionHandle, NetworkTransport};
pub use translate::{translate, translate_boxed};
