//! RPC error types.
//!
//! Every public API in this crate returns [`RpcError`]. Failures raised by
//! the remote handler arrive as [`RpcError::Remote`] and keep the handler's
//! machine-readable `kind`, so callers can branch without parsing messages.

use std::time::Duration;

/// Unified error type for the RPC bridge.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No reply arrived within the per-call timeout. The remote operation may
    /// still complete.
    #[error("rpc `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The channel to the authority is closed or broken.
    #[error("rpc transport error: {0}")]
    Transport(String),

    /// The remote handler ran and reported a failure.
    #[error("remote {kind} error: {message}")]
    Remote { kind: String, message: String },

    /// The authority does not know this command.
    #[error("unknown rpc command: {0}")]
    UnknownCommand(String),

    /// The authority speaks a different protocol version.
    #[error("protocol version mismatch: {0}")]
    ProtocolVersion(String),

    /// A payload could not be encoded or decoded.
    #[error("rpc codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Socket-level failure.
    #[error("rpc io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_) | Self::Io(_))
    }
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, RpcError>;
