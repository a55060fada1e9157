//! The authority's command table.
//!
//! Every worker-visible data operation is one named command with a typed
//! argument struct. Both sides compile against these definitions, so the
//! worker can only send what the authority knows how to run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shardbridge_kernel::{CommandRegistry, LocalHub, RemoteError, RpcServer, ServerHandle};
use shardbridge_store::{AuthorityDataManager, AuthorityStats, EntityRef, FlushReport, StoreError};

// ── command names ────────────────────────────────────────────────────

pub const FETCH: &str = "fetch";
pub const FETCH_OR_CREATE: &str = "fetch_or_create";
pub const UPDATE: &str = "update";
pub const REMOVE: &str = "remove";
pub const FLUSH: &str = "flush";
pub const STATS: &str = "stats";

// ── arguments ────────────────────────────────────────────────────────

/// Arguments for `fetch`, `fetch_or_create` and `remove`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetArgs {
    pub collection: String,
    pub target: EntityRef,
}

/// Arguments for `update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateArgs {
    pub collection: String,
    pub target: EntityRef,
    pub patch: Map<String, Value>,
}

/// Arguments for commands that take none.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NoArgs {}

// ── registry ─────────────────────────────────────────────────────────

/// Convert an authority failure into its wire form.
pub fn remote_error(err: StoreError) -> RemoteError {
    RemoteError::new(err.kind(), err.to_string())
}

/// Build the command table served by the authority process.
pub fn authority_commands() -> CommandRegistry<AuthorityDataManager> {
    let registry = CommandRegistry::new();

    registry.register(
        FETCH,
        |authority: Arc<AuthorityDataManager>, args: TargetArgs| async move {
            authority
                .fetch(&args.collection, args.target)
                .await
                .map_err(remote_error)
        },
    );

    registry.register(
        FETCH_OR_CREATE,
        |authority: Arc<AuthorityDataManager>, args: TargetArgs| async move {
            authority
                .fetch_or_create(&args.collection, args.target)
                .await
                .map_err(remote_error)
        },
    );

    registry.register(
        UPDATE,
        |authority: Arc<AuthorityDataManager>, args: UpdateArgs| async move {
            authority
                .update(&args.collection, args.target, &args.patch)
                .await
                .map_err(remote_error)
        },
    );

    registry.register(
        REMOVE,
        |authority: Arc<AuthorityDataManager>, args: TargetArgs| async move {
            authority
                .remove(&args.collection, args.target)
                .await
                .map_err(remote_error)
        },
    );

    registry.register(
        FLUSH,
        |authority: Arc<AuthorityDataManager>, _: NoArgs| async move {
            Ok::<FlushReport, RemoteError>(authority.flush().await)
        },
    );

    registry.register(
        STATS,
        |authority: Arc<AuthorityDataManager>, _: NoArgs| async move {
            Ok::<AuthorityStats, RemoteError>(authority.stats())
        },
    );

    registry
}

/// An RPC server dispatching the authority command table.
pub fn authority_server(authority: Arc<AuthorityDataManager>) -> RpcServer<AuthorityDataManager> {
    RpcServer::new(authority, authority_commands())
}

/// Serve `authority` on an in-process hub.
///
/// The server runs until every clone of the returned hub is dropped or the
/// handle is shut down.
pub fn serve_local(
    authority: Arc<AuthorityDataManager>,
    capacity: usize,
) -> (LocalHub, ServerHandle) {
    let (hub, inbound) = LocalHub::new(capacity);
    let handle = authority_server(authority).spawn(inbound);
    (hub, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shardbridge_kernel::{RpcOutcome, RpcRequest};
    use shardbridge_store::{AuthorityConfig, SchemaRegistry};

    fn server() -> RpcServer<AuthorityDataManager> {
        authority_server(Arc::new(AuthorityDataManager::in_memory(
            SchemaRegistry::with_builtins(),
            AuthorityConfig::default(),
        )))
    }

    #[test]
    fn table_is_closed() {
        let names = authority_commands().names();
        assert_eq!(
            names,
            vec!["fetch", "fetch_or_create", "flush", "remove", "stats", "update"]
        );
    }

    #[tokio::test]
    async fn update_then_fetch_through_dispatch() {
        let server = server();
        let reply = server
            .dispatch(RpcRequest::new(
                UPDATE,
                json!({"collection": "users", "target": "7", "patch": {"language": "de"}}),
            ))
            .await;
        let updated = match reply.outcome {
            RpcOutcome::Ok(value) => value,
            RpcOutcome::Err(e) => panic!("update failed: {e}"),
        };
        assert_eq!(updated["language"], json!("de"));

        // A full entity is accepted as the target too.
        let reply = server
            .dispatch(RpcRequest::new(
                FETCH,
                json!({"collection": "users", "target": {"id": "7", "language": "xx"}}),
            ))
            .await;
        let fetched = match reply.outcome {
            RpcOutcome::Ok(value) => value,
            RpcOutcome::Err(e) => panic!("fetch failed: {e}"),
        };
        assert_eq!(fetched["language"], json!("de"));
    }

    #[tokio::test]
    async fn unknown_collection_crosses_the_wire_with_its_kind() {
        let reply = server()
            .dispatch(RpcRequest::new(
                FETCH,
                json!({"collection": "widgets", "target": "1"}),
            ))
            .await;
        match reply.outcome {
            RpcOutcome::Err(e) => {
                assert_eq!(e.kind, "schema_not_found");
                assert!(e.message.contains("widgets"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
