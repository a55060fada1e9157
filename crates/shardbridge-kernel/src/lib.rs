//! shardbridge RPC bridge.
//!
//! Workers never touch the cache or the durable store directly; they send
//! named commands to the authority and wait for the reply. This crate is the
//! plumbing for that:
//!
//! - **[`protocol`]** -- request/response envelopes, correlation ids and the
//!   protocol version.
//! - **[`registry`]** -- typed command handlers backed by [`DashMap`].
//! - **[`ipc`]** -- in-process hub built on [`tokio::sync::mpsc`].
//! - **[`transport`]** -- the same channel shapes over TCP, one JSON frame
//!   per line.
//! - **[`client`]** / **[`server`]** -- call correlation with per-call
//!   timeouts, and concurrent dispatch on the authority.
//! - **[`error`]** -- unified error type via [`thiserror`].
//!
//! [`DashMap`]: dashmap::DashMap

pub mod client;
pub mod config;
pub mod error;
pub mod ipc;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;

// Re-export the most commonly used types at the crate root for convenience.
pub use client::RpcClient;
pub use config::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_TIMEOUT, RpcConfig};
pub use error::{Result, RpcError};
pub use ipc::{ClientChannel, Inbound, LocalHub};
pub use protocol::{PROTOCOL_VERSION, RemoteError, RpcOutcome, RpcRequest, RpcResponse, kinds};
pub use registry::{CommandRegistry, Handler, HandlerFuture};
pub use server::{RpcServer, ServerHandle};
pub use transport::{connect_tcp, serve_tcp};
