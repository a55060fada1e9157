//! Wire protocol.
//!
//! A call is a fixed command name plus a JSON argument payload, tagged with
//! a correlation id and the protocol version. Replies carry the same id and
//! either the JSON result or a [`RemoteError`].
//!
//! ```text
//! → {"id":"0190…","version":1,"command":"fetch","args":{"collection":"users","target":"42"}}
//! ← {"id":"0190…","outcome":{"ok":{"id":"42","language":"en"}}}
//! ← {"id":"0190…","outcome":{"err":{"kind":"store","message":"…"}}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Version of the command protocol spoken by this build.
pub const PROTOCOL_VERSION: u16 = 1;

/// Error kinds produced by the bridge itself (handlers add their own).
pub mod kinds {
    pub const UNKNOWN_COMMAND: &str = "unknown_command";
    pub const UNSUPPORTED_VERSION: &str = "unsupported_version";
    pub const BAD_ARGUMENTS: &str = "bad_arguments";
    pub const INTERNAL: &str = "internal";
}

/// A request travelling from a worker to the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id (UUID v7).
    pub id: Uuid,
    pub version: u16,
    pub command: String,
    pub args: Value,
}

impl RpcRequest {
    /// Build a request with a fresh correlation id.
    pub fn new(command: impl Into<String>, args: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            version: PROTOCOL_VERSION,
            command: command.into(),
            args,
        }
    }
}

/// A reply travelling back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Uuid,
    pub outcome: RpcOutcome,
}

/// Result of a remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcOutcome {
    Ok(Value),
    Err(RemoteError),
}

/// Serializable failure reported by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn bad_arguments(message: impl Into<String>) -> Self {
        Self::new(kinds::BAD_ARGUMENTS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(kinds::INTERNAL, message)
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_wire_shape() {
        let ok = serde_json::to_value(RpcOutcome::Ok(json!({"id": "1"}))).unwrap();
        assert_eq!(ok, json!({"ok": {"id": "1"}}));

        let err = serde_json::to_value(RpcOutcome::Err(RemoteError::new("store", "down"))).unwrap();
        assert_eq!(err, json!({"err": {"kind": "store", "message": "down"}}));
    }

    #[test]
    fn requests_get_distinct_ids() {
        let a = RpcRequest::new("fetch", Value::Null);
        let b = RpcRequest::new("fetch", Value::Null);
        assert_ne!(a.id, b.id);
        assert_eq!(a.version, PROTOCOL_VERSION);
    }
}
