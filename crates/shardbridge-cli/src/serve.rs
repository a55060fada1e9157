//! `shardbridge serve`: the authority process.
//!
//! Opens the durable store, starts the flush loop, and answers worker calls
//! over TCP until interrupted. On shutdown it stops accepting work, waits
//! for requests already being served, flushes every pending write, and only
//! then exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use shardbridge_kernel::serve_tcp;
use shardbridge_proxy::authority_server;
use shardbridge_store::AuthorityDataManager;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::BridgeConfig;

pub async fn run(config: BridgeConfig) -> Result<()> {
    info!("starting shardbridge authority");

    // 1. Open the durable store.
    let db_path = config.store.db_path.clone();
    let authority = AuthorityDataManager::open(
        db_path.clone(),
        config.schema_registry(),
        config.authority_config(),
    )
    .await
    .context("failed to open durable store")?;
    let authority = Arc::new(authority);
    info!(
        path = %db_path.display(),
        collections = ?authority.registry().collections(),
        "store initialized"
    );

    // 2. Start the write-behind flush loop.
    authority.start().await;

    // 3. Accept worker connections.
    let listener = TcpListener::bind(config.rpc.listen.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.rpc.listen))?;
    let (hub, inbound) = mpsc::channel(config.rpc.channel_capacity.max(1));
    let server = authority_server(Arc::clone(&authority)).spawn(inbound);
    let mut accept = tokio::spawn(serve_tcp(listener, hub, config.rpc.channel_capacity));

    // 4. Run until interrupted or the listener dies.
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("shutdown requested"),
                Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
            }
        }
        outcome = &mut accept => {
            match outcome {
                Ok(()) => warn!("rpc listener stopped"),
                Err(e) => error!(error = %e, "rpc listener task panicked"),
            }
        }
    }

    // 5. Stop taking work, let in-flight requests finish, then flush
    //    everything that is pending.
    accept.abort();
    server.shutdown().await;
    let report = authority.shutdown().await.context("final flush failed")?;
    if report.failed > 0 {
        warn!(failed = report.failed, "some writes could not be persisted before exit");
    }
    info!(flushed = report.flushed, "authority stopped");
    Ok(())
}
