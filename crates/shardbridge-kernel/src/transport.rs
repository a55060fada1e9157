//! TCP transport.
//!
//! Frames are newline-delimited JSON: one [`RpcRequest`] or [`RpcResponse`]
//! per line. Both ends adapt the socket to the same channel shapes used by
//! the in-process hub, so the client and server are transport-agnostic.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ipc::{ClientChannel, Inbound};
use crate::protocol::{RpcRequest, RpcResponse};

// ---------------------------------------------------------------------------
// Authority side
// ---------------------------------------------------------------------------

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections forever, feeding every decoded request into `hub`.
///
/// Returns only when `hub` is closed. A failed `accept` (descriptor
/// exhaustion, an aborted handshake) is logged and retried.
pub async fn serve_tcp(listener: TcpListener, hub: mpsc::Sender<Inbound>, capacity: usize) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "rpc listener ready");
    }
    accept_loop(&listener, hub, capacity).await;
}

/// Source of inbound connections.
trait Acceptor {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

async fn accept_loop<A: Acceptor>(acceptor: &A, hub: mpsc::Sender<Inbound>, capacity: usize) {
    loop {
        let accepted = acceptor.accept().await;
        if hub.is_closed() {
            return;
        }
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed, retrying");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        debug!(%peer, "worker connected");

        let hub = hub.clone();
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            let (resp_tx, resp_rx) = mpsc::channel::<RpcResponse>(capacity.max(1));
            let writer_task = tokio::spawn(write_lines(writer, resp_rx));

            read_requests(reader, hub, resp_tx).await;
            // Let in-flight replies drain before closing the socket.
            if let Err(e) = writer_task.await {
                warn!(error = %e, "rpc writer task failed");
            }
            debug!(%peer, "worker disconnected");
        });
    }
}

async fn read_requests(
    reader: OwnedReadHalf,
    hub: mpsc::Sender<Inbound>,
    reply_to: mpsc::Sender<RpcResponse>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "rpc read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                let envelope = Inbound {
                    request,
                    reply_to: reply_to.clone(),
                };
                if hub.send(envelope).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "dropping malformed rpc frame"),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

/// Connect to an authority listening on `addr`.
pub async fn connect_tcp(addr: impl ToSocketAddrs, capacity: usize) -> Result<ClientChannel> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    let capacity = capacity.max(1);

    let (req_tx, req_rx) = mpsc::channel::<RpcRequest>(capacity);
    let (resp_tx, resp_rx) = mpsc::channel::<RpcResponse>(capacity);

    tokio::spawn(write_lines(writer, req_rx));
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<RpcResponse>(&line) {
                Ok(response) => {
                    if resp_tx.send(response).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "dropping malformed rpc reply"),
            }
        }
        debug!("authority connection closed");
    });

    Ok(ClientChannel {
        outbound: req_tx,
        inbound: resp_rx,
    })
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

async fn write_lines<T: serde::Serialize>(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<T>) {
    while let Some(frame) = rx.recv().await {
        let mut line = match serde_json::to_vec(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode rpc frame");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = writer.write_all(&line).await {
            warn!(error = %e, "rpc write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
