//! cq - commit-queue pool tools
//!
//! Offline operator commands for the validation pool.

use anyhow::Result;
use clap::{Parser, Subcommand};
use cq_pool::PoolConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "cq")]
#[command(about = "Commit-queue validation pool tools")]
#[command(version)]
struct Cli {
    /// Path to the pool configuration (defaults to the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the changes of a pending-commit manifest
    Pending {
        /// Manifest XML file
        manifest: PathBuf,
    },

    /// Summarize a saved pool snapshot
    Snapshot {
        /// Snapshot JSON file
        file: PathBuf,
    },

    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cq_pool=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = PoolConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Pending { manifest } => cli::run_pending(&manifest)?,
        Commands::Snapshot { file } => cli::run_snapshot(&file, &config)?,
        Commands::Config => cli::run_config(&config, cli.config.as_deref())?,
    }

    Ok(())
}
