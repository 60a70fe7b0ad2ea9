//! relayrpc-tcp: TCP network provider for the RelayRPC client core.
//!
//! # Features
//! - Newline-delimited JSON frames (see [`frame`])
//! - Request multiplexing by id over `connection_num` lanes, round-robin
//! - Per-call deadlines for blocking, callback and one-way sends
//! - Pending calls fail with `CLIENT_NETWORK` when their lane goes down

pub mod connection;
pub mod frame;
mod pending;
pub mod transport;

pub use connection::TcpConnection;
pub use frame::{Frame, WireError};
pub use transport::{TcpTransport, TcpTransportConfig};
