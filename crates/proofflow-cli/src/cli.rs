//! CLI argument definitions for proofflow.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// proofflow -- natural-language ZK proof and USDC transfer workflows.
#[derive(Parser)]
#[command(
    name = "proofflow",
    version,
    about = "Compile and run natural-language proof and payment workflows",
    long_about = "Turns commands such as \"if Alice is KYC verified send her 0.05 USDC on \
                  Solana\" into ordered proof and transfer steps, runs them through the \
                  external executor and reports the results."
)]
pub struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Pipeline configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Workflow history database (PROOFFLOW_DB takes precedence).
    #[arg(long, global = true, default_value = "data/proofflow.db")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API.
    Serve {
        /// Address to bind the HTTP server to.
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        /// Port to listen on.
        #[arg(long, short, default_value_t = 3000)]
        port: u16,
    },

    /// Compile, validate and execute one command, printing the report.
    Run {
        /// The natural-language command.
        command: String,

        /// Only compile and validate; do not execute.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show how a command would be classified.
    Classify {
        command: String,
    },

    /// Look up the status of a USDC transfer.
    Poll {
        transfer_id: String,

        /// ETH, SOL or BASE.
        #[arg(long, short, default_value = "ETH")]
        ledger: String,
    },

    /// List recently executed workflows.
    History {
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },
}
