//! CLI entry point for shardbridge.
//!
//! This binary provides the `shardbridge` command: `serve` runs the
//! authority process, every other subcommand is a worker that proxies one
//! call to a running authority.

mod cli;
mod config;
mod helpers;
mod serve;
mod worker;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use crate::cli::{Cli, Commands};
use crate::config::BridgeConfig;
use crate::helpers::{init_tracing, load_dotenv};

#[tokio::main]
async fn main() -> Result<()> {
    // `.env` may set RUST_LOG, so load it before the subscriber.
    let dotenv_loaded = load_dotenv();
    let cli = Cli::parse();

    let serving = matches!(cli.command, Commands::Serve { .. });
    init_tracing(if serving { "info" } else { "warn" });
    if dotenv_loaded {
        debug!(".env loaded");
    }

    let mut config = BridgeConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.addr {
        config.rpc.listen = addr;
    }

    match cli.command {
        Commands::Serve { db } => {
            if let Some(db) = db {
                config.store.db_path = db;
            }
            serve::run(config).await
        }
        command => worker::run(&config, command).await,
    }
}
