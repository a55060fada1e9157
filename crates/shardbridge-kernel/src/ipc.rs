//! In-process channels between workers and the authority.
//!
//! The authority consumes a single stream of [`Inbound`] envelopes. Each
//! envelope carries the request plus the sender on which its reply must be
//! delivered, so one server loop can answer many independent connections.
//!
//! A worker holds a [`ClientChannel`]: an outbound request sender and an
//! inbound response receiver. [`LocalHub::connect`] produces one backed by
//! tokio channels; the TCP transport in [`crate::transport`] produces the
//! same shape over a socket.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use shardbridge_kernel::ipc::LocalHub;
//! # async fn example() {
//! let (hub, mut inbound) = LocalHub::new(256);
//! let worker = hub.connect();
//! // hand `inbound` to an RpcServer and `worker` to an RpcClient
//! # }
//! ```

use tokio::sync::mpsc;

use crate::protocol::{RpcRequest, RpcResponse};

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// A request as seen by the authority, paired with its reply route.
#[derive(Debug)]
pub struct Inbound {
    pub request: RpcRequest,
    pub reply_to: mpsc::Sender<RpcResponse>,
}

/// Worker-side half of a connection to the authority.
#[derive(Debug)]
pub struct ClientChannel {
    pub outbound: mpsc::Sender<RpcRequest>,
    pub inbound: mpsc::Receiver<RpcResponse>,
}

// ---------------------------------------------------------------------------
// Local hub
// ---------------------------------------------------------------------------

/// In-process point-to-point hub.
///
/// Cloning the hub is cheap; every clone feeds the same authority stream.
#[derive(Debug, Clone)]
pub struct LocalHub {
    sender: mpsc::Sender<Inbound>,
    capacity: usize,
}

impl LocalHub {
    /// Create a hub and the receiver the authority should drain.
    ///
    /// `capacity` bounds every channel created by the hub.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Inbound>) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender, capacity }, receiver)
    }

    /// Open a new worker connection.
    ///
    /// A forwarding task wraps each outgoing request with this connection's
    /// reply route. It ends when the worker drops its sender or the authority
    /// stops receiving; either way the worker's response stream then closes.
    pub fn connect(&self) -> ClientChannel {
        let (req_tx, mut req_rx) = mpsc::channel::<RpcRequest>(self.capacity);
        let (resp_tx, resp_rx) = mpsc::channel::<RpcResponse>(self.capacity);
        let hub = self.sender.clone();

        tokio::spawn(async move {
            while let Some(request) = req_rx.recv().await {
                let envelope = Inbound {
                    request,
                    reply_to: resp_tx.clone(),
                };
                if hub.send(envelope).await.is_err() {
                    tracing::debug!("authority stream closed, dropping worker connection");
                    break;
                }
            }
        });

        ClientChannel {
            outbound: req_tx,
            inbound: resp_rx,
        }
    }

    /// Returns `true` once the authority has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
