//! CLI argument definitions for shardbridge.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// shardbridge -- single-authority data access for multi-process services.
#[derive(Parser)]
#[command(
    name = "shardbridge",
    version,
    about = "shardbridge -- single-authority data access layer",
    long_about = "Runs the authority process that owns the cache and durable store, \
                  or talks to a running authority as a worker."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Authority address (overrides `rpc.listen` from the config).
    #[arg(long, global = true)]
    pub addr: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the authority process.
    Serve {
        /// SQLite database path (overrides `store.db_path`).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Read an entity; prints `null` if it does not exist.
    Fetch { collection: String, id: String },

    /// Read an entity, creating it from its template if missing.
    FetchOrCreate { collection: String, id: String },

    /// Deep-merge a JSON object into an entity.
    Update {
        collection: String,
        id: String,
        /// JSON object, e.g. '{"language":"pt"}'.
        patch: String,
    },

    /// Delete an entity everywhere.
    Remove { collection: String, id: String },

    /// Flush the authority's pending writes now.
    Flush,

    /// Show authority queue and cache statistics.
    Stats,
}
