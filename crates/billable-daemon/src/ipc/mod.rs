//! JSON-RPC over a Unix socket

pub mod connection;
pub mod protocol;
pub mod server;

pub use connection::{ConnectionError, MessageWriter, RequestReader};
pub use protocol::{Notification, Request, RequestId, Response, RpcError};
pub use server::IpcServer;
