//! Worker-side RPC client.
//!
//! Each call is tagged with a fresh correlation id and parked in a pending
//! table until its reply arrives. A background router task drains the
//! response stream and completes the matching caller. Replies for ids that
//! are no longer pending (the caller timed out, or the reply is a duplicate)
//! are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RpcConfig;
use crate::error::{Result, RpcError};
use crate::ipc::ClientChannel;
use crate::protocol::{RemoteError, RpcOutcome, RpcRequest, RpcResponse, kinds};

type PendingTable = DashMap<Uuid, oneshot::Sender<RpcOutcome>>;

/// Cloneable handle for issuing calls to the authority.
#[derive(Clone)]
pub struct RpcClient {
    outbound: mpsc::Sender<RpcRequest>,
    pending: Arc<PendingTable>,
    closed: Arc<AtomicBool>,
    timeout: Duration,
}

impl RpcClient {
    /// Wrap a connection and start routing its replies.
    pub fn new(channel: ClientChannel, config: &RpcConfig) -> Self {
        let pending: Arc<PendingTable> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(route_responses(
            channel.inbound,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Self {
            outbound: channel.outbound,
            pending,
            closed,
            timeout: config.timeout,
        }
    }

    /// Call `command` with typed arguments and decode the typed result.
    pub async fn call<A, R>(&self, command: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args)?;
        let value = self.call_raw(command, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call `command` with the client's default timeout.
    pub async fn call_raw(&self, command: &str, args: Value) -> Result<Value> {
        self.call_with_timeout(command, args, self.timeout).await
    }

    /// Call `command`, giving up after `timeout`.
    ///
    /// A timeout only abandons the wait; the authority may still run the
    /// command to completion.
    pub async fn call_with_timeout(
        &self,
        command: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let request = RpcRequest::new(command, args);
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        // Removes the entry however this call ends, including when the
        // caller's future is dropped before a reply arrives.
        let _entry = PendingEntry {
            pending: &self.pending,
            id,
        };

        // Checked after inserting: the router sets `closed` before it clears
        // the table, so either it sees our entry or we see the flag.
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Transport("connection to authority closed".into()));
        }
        if self.outbound.send(request).await.is_err() {
            return Err(RpcError::Transport("connection to authority closed".into()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(RpcOutcome::Ok(value))) => Ok(value),
            Ok(Ok(RpcOutcome::Err(remote))) => Err(remote_to_error(command, remote)),
            Ok(Err(_)) => Err(RpcError::Transport(
                "connection closed before reply".into(),
            )),
            Err(_) => {
                warn!(command, ?timeout, "rpc call timed out");
                Err(RpcError::Timeout {
                    command: command.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Number of calls awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` once the reply stream has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Default per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

struct PendingEntry<'a> {
    pending: &'a PendingTable,
    id: Uuid,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

async fn route_responses(
    mut inbound: mpsc::Receiver<RpcResponse>,
    pending: Arc<PendingTable>,
    closed: Arc<AtomicBool>,
) {
    while let Some(response) = inbound.recv().await {
        match pending.remove(&response.id) {
            Some((_, waiter)) => {
                // The waiter may have been dropped mid-flight; nothing to do.
                let _ = waiter.send(response.outcome);
            }
            None => debug!(id = %response.id, "dropping late or duplicate rpc reply"),
        }
    }

    closed.store(true, Ordering::Release);
    // Dropping the senders wakes every waiter with a transport error.
    pending.clear();
    debug!("rpc reply stream ended");
}

fn remote_to_error(command: &str, remote: RemoteError) -> RpcError {
    match remote.kind.as_str() {
        kinds::UNKNOWN_COMMAND => RpcError::UnknownCommand(command.to_string()),
        kinds::UNSUPPORTED_VERSION => RpcError::ProtocolVersion(remote.message),
        _ => RpcError::Remote {
            kind: remote.kind,
            message: remote.message,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair() -> (RpcClient, mpsc::Receiver<RpcRequest>, mpsc::Sender<RpcResponse>) {
        let (req_tx, req_rx) = mpsc::channel(8);
        let (resp_tx, resp_rx) = mpsc::channel(8);
        let client = RpcClient::new(
            ClientChannel {
                outbound: req_tx,
                inbound: resp_rx,
            },
            &RpcConfig::default().with_timeout(Duration::from_millis(100)),
        );
        (client, req_rx, resp_tx)
    }

    #[tokio::test]
    async fn reply_completes_the_matching_call() {
        let (client, mut requests, responses) = pair();
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call_raw("fetch", json!({"id": "1"})).await }
        });

        let request = requests.recv().await.unwrap();
        assert_eq!(request.command, "fetch");
        responses
            .send(RpcResponse {
                id: request.id,
                outcome: RpcOutcome::Ok(json!({"id": "1"})),
            })
            .await
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), json!({"id": "1"}));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn timeout_clears_the_pending_entry() {
        let (client, mut requests, responses) = pair();
        let err = client.call_raw("slow", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout { .. }));
        assert!(err.is_transient());
        assert_eq!(client.in_flight(), 0);

        // A late reply is dropped without disturbing later calls.
        let late = requests.recv().await.unwrap();
        responses
            .send(RpcResponse {
                id: late.id,
                outcome: RpcOutcome::Ok(json!("late")),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn remote_kinds_map_to_error_variants() {
        let (client, mut requests, responses) = pair();
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let remote = match request.command.as_str() {
                    "nope" => RemoteError::new(kinds::UNKNOWN_COMMAND, "nope"),
                    _ => RemoteError::new("store", "disk full"),
                };
                let _ = responses
                    .send(RpcResponse {
                        id: request.id,
                        outcome: RpcOutcome::Err(remote),
                    })
                    .await;
            }
        });

        let err = client.call_raw("nope", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::UnknownCommand(ref c) if c == "nope"));

        match client.call_raw("update", Value::Null).await.unwrap_err() {
            RpcError::Remote { kind, message } => {
                assert_eq!(kind, "store");
                assert_eq!(message, "disk full");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_stream_fails_waiters() {
        let (client, mut requests, responses) = pair();
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call_raw("fetch", Value::Null).await }
        });
        requests.recv().await.unwrap();
        drop(responses);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
        assert!(client.is_closed());

        let err = client.call_raw("fetch", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn dropped_call_clears_the_pending_entry() {
        let (client, mut requests, _responses) = pair();
        let call = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .call_with_timeout("slow", Value::Null, Duration::from_secs(30))
                    .await
            }
        });
        requests.recv().await.unwrap();
        assert_eq!(client.in_flight(), 1);

        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn calls_after_close_fail_without_waiting() {
        let (client, _requests, responses) = pair();
        drop(responses);
        while !client.is_closed() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            client.call_with_timeout("fetch", Value::Null, Duration::from_secs(30)),
        )
        .await
        .expect("closed client should fail at once");
        assert!(matches!(outcome, Err(RpcError::Transport(_))));
        assert_eq!(client.in_flight(), 0);
    }
}
