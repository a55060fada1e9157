//! Errors seen by code calling through the proxy.

use std::time::Duration;

use shardbridge_kernel::RpcError;

/// Alias for `Result<T, ProxyError>`.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Failure of a proxied data call.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The authority ran the operation and it failed.
    #[error("authority rejected the call ({kind}): {message}")]
    Remote { kind: String, message: String },

    /// No reply within the call timeout. The operation may still apply.
    #[error("authority did not answer `{command}` within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The connection to the authority is gone.
    #[error("authority unreachable: {0}")]
    Transport(String),

    /// Worker and authority disagree on the command set or protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A reply could not be decoded.
    #[error("malformed reply: {0}")]
    Codec(String),
}

impl ProxyError {
    /// Whether the caller should present a generic "try again" condition.
    ///
    /// Durable store failures, timeouts and transport failures are
    /// transient. Schema and protocol errors are programmer errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { kind, .. } => kind == "store" || kind == "cache_unavailable",
            Self::Timeout { .. } | Self::Transport(_) => true,
            Self::Protocol(_) | Self::Codec(_) => false,
        }
    }

    /// Machine-readable kind, matching the authority's error kinds where
    /// the failure happened remotely.
    pub fn kind(&self) -> &str {
        match self {
            Self::Remote { kind, .. } => kind,
            Self::Timeout { .. } => "timeout",
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Codec(_) => "codec",
        }
    }
}

impl From<RpcError> for ProxyError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote { kind, message } => Self::Remote { kind, message },
            RpcError::Timeout { command, timeout } => Self::Timeout { command, timeout },
            RpcError::Transport(msg) => Self::Transport(msg),
            RpcError::Io(e) => Self::Transport(e.to_string()),
            RpcError::UnknownCommand(cmd) => {
                Self::Protocol(format!("authority does not know `{cmd}`"))
            }
            RpcError::ProtocolVersion(msg) => Self::Protocol(msg),
            RpcError::Codec(e) => Self::Codec(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        let store = ProxyError::Remote {
            kind: "store".into(),
            message: "disk I/O error".into(),
        };
        assert!(store.is_retryable());
        assert_eq!(store.kind(), "store");

        let schema = ProxyError::Remote {
            kind: "schema_not_found".into(),
            message: "no schema registered for collection `widgets`".into(),
        };
        assert!(!schema.is_retryable());

        let timeout = ProxyError::from(RpcError::Timeout {
            command: "update".into(),
            timeout: Duration::from_secs(45),
        });
        assert!(timeout.is_retryable());
        assert_eq!(timeout.kind(), "timeout");

        let protocol = ProxyError::from(RpcError::UnknownCommand("purge".into()));
        assert!(!protocol.is_retryable());
    }
}
