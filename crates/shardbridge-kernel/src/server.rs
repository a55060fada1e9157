//! Authority-side RPC server.
//!
//! Drains the inbound envelope stream and runs every request in its own
//! task, so a slow command never blocks the others and a command keeps
//! running even if its caller stopped waiting. Shutting the server down
//! stops intake and then waits for those tasks, so nothing is still
//! mutating the authority once [`ServerHandle::shutdown`] returns.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::ipc::Inbound;
use crate::protocol::{PROTOCOL_VERSION, RemoteError, RpcOutcome, RpcRequest, RpcResponse, kinds};
use crate::registry::CommandRegistry;

/// Dispatches requests to the handlers in a [`CommandRegistry`].
pub struct RpcServer<H> {
    handle: Arc<H>,
    registry: Arc<CommandRegistry<H>>,
}

impl<H> Clone for RpcServer<H> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<H: Send + Sync + 'static> RpcServer<H> {
    pub fn new(handle: Arc<H>, registry: CommandRegistry<H>) -> Self {
        Self {
            handle,
            registry: Arc::new(registry),
        }
    }

    /// Run one request to completion and build its reply.
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id;

        if request.version != PROTOCOL_VERSION {
            return RpcResponse {
                id,
                outcome: RpcOutcome::Err(RemoteError::new(
                    kinds::UNSUPPORTED_VERSION,
                    format!(
                        "authority speaks version {PROTOCOL_VERSION}, request uses {}",
                        request.version
                    ),
                )),
            };
        }

        let Some(handler) = self.registry.get(&request.command) else {
            warn!(command = %request.command, "unknown rpc command");
            return RpcResponse {
                id,
                outcome: RpcOutcome::Err(RemoteError::new(
                    kinds::UNKNOWN_COMMAND,
                    format!("no handler for `{}`", request.command),
                )),
            };
        };

        debug!(command = %request.command, %id, "dispatching rpc");
        let outcome = match handler(Arc::clone(&self.handle), request.args).await {
            Ok(value) => RpcOutcome::Ok(value),
            Err(e) => {
                debug!(command = %request.command, error = %e, "rpc handler failed");
                RpcOutcome::Err(e)
            }
        };
        RpcResponse { id, outcome }
    }

    /// Serve until every sender of `inbound` has been dropped.
    pub async fn serve(self, inbound: mpsc::Receiver<Inbound>) {
        self.serve_until(inbound, std::future::pending()).await
    }

    /// Serve until `stop` resolves or every sender of `inbound` is dropped.
    ///
    /// On return no request is still running: intake is closed, requests
    /// already buffered in the channel are dispatched, and every dispatch
    /// task has finished and sent its reply.
    pub async fn serve_until<F>(self, mut inbound: mpsc::Receiver<Inbound>, stop: F)
    where
        F: Future<Output = ()>,
    {
        info!(commands = ?self.registry.names(), "rpc server started");
        let mut tasks = JoinSet::new();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                next = inbound.recv() => match next {
                    Some(envelope) => self.dispatch_in(&mut tasks, envelope),
                    None => break,
                },
                () = &mut stop => {
                    info!("rpc server stopping intake");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => reap(joined),
            }
        }

        inbound.close();
        while let Ok(envelope) = inbound.try_recv() {
            self.dispatch_in(&mut tasks, envelope);
        }

        let draining = tasks.len();
        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }
        info!(drained = draining, "rpc server stopped");
    }

    /// Spawn the server onto the runtime.
    pub fn spawn(self, inbound: mpsc::Receiver<Inbound>) -> ServerHandle {
        let stop = Arc::new(Notify::new());
        let signal = Arc::clone(&stop);
        let task = tokio::spawn(async move {
            self.serve_until(inbound, signal.notified()).await;
        });
        ServerHandle { stop, task }
    }

    fn dispatch_in(&self, tasks: &mut JoinSet<()>, envelope: Inbound) {
        let Inbound { request, reply_to } = envelope;
        let server = self.clone();
        tasks.spawn(async move {
            let response = server.dispatch(request).await;
            if reply_to.send(response).await.is_err() {
                debug!("caller went away before the reply was sent");
            }
        });
    }

    pub fn registry(&self) -> &CommandRegistry<H> {
        &self.registry
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "rpc dispatch task failed");
    }
}

/// Handle to a server started with [`RpcServer::spawn`].
///
/// Dropping the handle leaves the server running.
pub struct ServerHandle {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop taking requests and wait until every in-flight request has
    /// finished and replied.
    pub async fn shutdown(self) {
        self.stop.notify_one();
        if let Err(e) = self.task.await {
            warn!(error = %e, "rpc server task failed");
        }
    }

    /// Whether the server loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Greeter;

    #[derive(Default)]
    struct Counter {
        done: AtomicUsize,
    }

    fn server() -> RpcServer<Greeter> {
        let registry = CommandRegistry::new();
        registry.register("greet", |_: Arc<Greeter>, name: String| async move {
            Ok(format!("hello {name}"))
        });
        RpcServer::new(Arc::new(Greeter), registry)
    }

    #[tokio::test]
    async fn dispatch_known_command() {
        let response = server().dispatch(RpcRequest::new("greet", json!("ada"))).await;
        assert_eq!(response.outcome, RpcOutcome::Ok(json!("hello ada")));
    }

    #[tokio::test]
    async fn dispatch_unknown_command() {
        let request = RpcRequest::new("launch", Value::Null);
        let id = request.id;
        let response = server().dispatch(request).await;
        assert_eq!(response.id, id);
        match response.outcome {
            RpcOutcome::Err(e) => assert_eq!(e.kind, kinds::UNKNOWN_COMMAND),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_rejects_other_versions() {
        let mut request = RpcRequest::new("greet", json!("ada"));
        request.version = PROTOCOL_VERSION + 1;
        match server().dispatch(request).await.outcome {
            RpcOutcome::Err(e) => assert_eq!(e.kind, kinds::UNSUPPORTED_VERSION),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_requests() {
        let registry = CommandRegistry::new();
        registry.register("bump", |counter: Arc<Counter>, _: Value| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(counter.done.fetch_add(1, Ordering::SeqCst) + 1)
        });
        let counter = Arc::new(Counter::default());
        let (hub, inbound) = mpsc::channel(8);
        let handle = RpcServer::new(Arc::clone(&counter), registry).spawn(inbound);

        let (reply_to, mut replies) = mpsc::channel(8);
        for _ in 0..3 {
            hub.send(Inbound {
                request: RpcRequest::new("bump", Value::Null),
                reply_to: reply_to.clone(),
            })
            .await
            .unwrap();
        }

        handle.shutdown().await;
        assert_eq!(counter.done.load(Ordering::SeqCst), 3);
        for _ in 0..3 {
            let reply = replies.try_recv().unwrap();
            assert!(matches!(reply.outcome, RpcOutcome::Ok(_)));
        }

        // Intake is closed once the server has stopped.
        let late = hub
            .send(Inbound {
                request: RpcRequest::new("bump", Value::Null),
                reply_to,
            })
            .await;
        assert!(late.is_err());
    }
}
