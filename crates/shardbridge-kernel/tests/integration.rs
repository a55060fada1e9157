//! Integration tests for the shardbridge-kernel crate.
//!
//! These run a real client against a real server, over both the in-process
//! hub and a loopback TCP socket, with a small key/value handle standing in
//! for the authority.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use shardbridge_kernel::{
    CommandRegistry, LocalHub, RemoteError, RpcClient, RpcConfig, RpcError, RpcServer, connect_tcp,
    serve_tcp,
};
use tokio::net::TcpListener;
use tokio::sync::Notify;

#[derive(Default)]
struct Kv {
    entries: Mutex<HashMap<String, Value>>,
    slow_done: Notify,
}

#[derive(Serialize, Deserialize)]
struct PutArgs {
    key: String,
    value: Value,
}

fn kv_registry() -> CommandRegistry<Kv> {
    let registry = CommandRegistry::new();
    registry.register("put", |kv: Arc<Kv>, args: PutArgs| async move {
        kv.entries.lock().unwrap().insert(args.key, args.value);
        Ok(())
    });
    registry.register("get", |kv: Arc<Kv>, key: String| async move {
        Ok(kv.entries.lock().unwrap().get(&key).cloned())
    });
    registry.register("slow_put", |kv: Arc<Kv>, args: PutArgs| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        kv.entries.lock().unwrap().insert(args.key, args.value);
        kv.slow_done.notify_one();
        Ok(())
    });
    registry.register("refuse", |_: Arc<Kv>, _: Value| async move {
        Err::<(), _>(RemoteError::new("store", "read only"))
    });
    registry
}

fn local_pair(timeout: Duration) -> (RpcClient, Arc<Kv>) {
    let kv = Arc::new(Kv::default());
    let (hub, inbound) = LocalHub::new(64);
    RpcServer::new(Arc::clone(&kv), kv_registry()).spawn(inbound);
    let client = RpcClient::new(hub.connect(), &RpcConfig::default().with_timeout(timeout));
    (client, kv)
}

// ═══════════════════════════════════════════════════════════════════════
//  In-process hub
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn typed_calls_round_trip() {
    let (client, _) = local_pair(Duration::from_secs(5));

    client
        .call::<_, ()>(
            "put",
            &PutArgs {
                key: "a".into(),
                value: json!({"n": 1}),
            },
        )
        .await
        .unwrap();
    let got: Option<Value> = client.call("get", "a").await.unwrap();
    assert_eq!(got, Some(json!({"n": 1})));

    let missing: Option<Value> = client.call("get", "zzz").await.unwrap();
    assert_eq!(missing, None);
}

#[tokio::test]
async fn remote_failure_keeps_its_kind() {
    let (client, _) = local_pair(Duration::from_secs(5));
    match client.call_raw("refuse", Value::Null).await.unwrap_err() {
        RpcError::Remote { kind, message } => {
            assert_eq!(kind, "store");
            assert_eq!(message, "read only");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_command_and_bad_arguments() {
    let (client, _) = local_pair(Duration::from_secs(5));

    let err = client.call_raw("drop_table", Value::Null).await.unwrap_err();
    assert!(matches!(err, RpcError::UnknownCommand(_)));

    match client.call_raw("put", json!({"key": 5})).await.unwrap_err() {
        RpcError::Remote { kind, .. } => assert_eq!(kind, "bad_arguments"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn timed_out_call_still_completes_on_the_authority() {
    let (client, kv) = local_pair(Duration::from_millis(20));

    let err = client
        .call_raw("slow_put", json!({"key": "k", "value": 9}))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout { .. }));

    tokio::time::timeout(Duration::from_secs(5), kv.slow_done.notified())
        .await
        .unwrap();
    assert_eq!(kv.entries.lock().unwrap().get("k"), Some(&json!(9)));

    // The late reply is discarded and the connection stays usable.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let got: Option<Value> = client.call("get", "k").await.unwrap();
    assert_eq!(got, Some(json!(9)));
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn concurrent_calls_are_correlated() {
    let (client, _) = local_pair(Duration::from_secs(5));

    let mut handles = Vec::new();
    for i in 0..32 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .call::<_, ()>(
                    "put",
                    &PutArgs {
                        key: format!("k{i}"),
                        value: json!(i),
                    },
                )
                .await
                .unwrap();
            let got: Option<Value> = client.call("get", &format!("k{i}")).await.unwrap();
            assert_eq!(got, Some(json!(i)));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  TCP transport
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn tcp_client_and_server() {
    let kv = Arc::new(Kv::default());
    let (hub, inbound) = tokio::sync::mpsc::channel(64);
    RpcServer::new(Arc::clone(&kv), kv_registry()).spawn(inbound);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_tcp(listener, hub, 64));

    let config = RpcConfig::default().with_timeout(Duration::from_secs(5));
    let first = RpcClient::new(connect_tcp(addr, 64).await.unwrap(), &config);
    let second = RpcClient::new(connect_tcp(addr, 64).await.unwrap(), &config);

    first
        .call::<_, ()>(
            "put",
            &PutArgs {
                key: "shared".into(),
                value: json!("from first"),
            },
        )
        .await
        .unwrap();
    let got: Option<Value> = second.call("get", "shared").await.unwrap();
    assert_eq!(got, Some(json!("from first")));

    let err = second.call_raw("refuse", Value::Null).await.unwrap_err();
    assert!(matches!(err, RpcError::Remote { .. }));
}
