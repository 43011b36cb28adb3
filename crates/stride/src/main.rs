//! Stride - offline-first content cache and version sync
//!
//! Main entry point for the Stride CLI. Every command works against the
//! local database; none of them talks to the remote.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod offline;

use commands::{cache, config, sweep, usage, versions};

/// Stride - offline-first content cache and version sync
#[derive(Parser)]
#[command(name = "stride")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Database file (default: from config, then the platform data dir)
    #[arg(long, global = true, env = "STRIDE_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show downloaded content and its storage footprint
    Usage(usage::UsageArgs),

    /// Remove expired downloads and reset stuck updates now
    Sweep(sweep::SweepArgs),

    /// List persisted version records
    Versions(versions::VersionsArgs),

    /// Inspect or clear cached entries
    Cache(cache::CacheArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "stride=debug,stride_sync=debug,stride_cache=debug,stride_store=debug,stride_config=debug,info"
    } else {
        "stride=info,stride_sync=info,stride_cache=info,warn"
    };

    let log_dir = stride_config::user_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "stride.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "stride=trace,stride_sync=trace,stride_cache=trace,stride_store=trace,stride_config=trace,info",
                )),
        )
        .init();

    let loaded = stride_config::load_config(None)?;
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        loaded,
        database: cli.database,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Usage(args) => usage::run(args, &ctx).await,
        Commands::Sweep(args) => sweep::run(args, &ctx).await,
        Commands::Versions(args) => versions::run(args, &ctx).await,
        Commands::Cache(args) => cache::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
