//! # shardbridge-proxy
//!
//! Worker-facing side of shardbridge.
//!
//! The authority process serves [`authority_commands`] through an
//! [`RpcServer`](shardbridge_kernel::RpcServer). Worker processes hold a
//! [`ProxyDataManager`], which exposes the same data methods as the
//! authority and forwards each one as a typed RPC call.
//!
//! ```ignore
//! let authority = Arc::new(AuthorityDataManager::in_memory(registry, config));
//! let (hub, _server) = serve_local(authority, 256);
//!
//! let proxy = ProxyDataManager::local(&hub, &RpcConfig::default());
//! let user = proxy.fetch_or_create("users", "42").await?;
//! ```

pub mod access;
pub mod commands;
pub mod error;
pub mod proxy;

pub use access::EntityAccess;
pub use commands::{
    NoArgs, TargetArgs, UpdateArgs, authority_commands, authority_server, remote_error,
    serve_local,
};
pub use error::{ProxyError, ProxyResult};
pub use proxy::ProxyDataManager;
