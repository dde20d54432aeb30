#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! Watch IMAP mailboxes and save matching attachments to disk

use anyhow::Context;
use clap::Parser;
use imap_to_fs::{Config, WatchCoordinator};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imap-to-fs")]
#[command(about = "Save attachments of matching IMAP messages to the filesystem")]
struct Args {
    /// Config file (default: $IMAP_TO_FS_CONFIG or ./config.json)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    let path = args
        .config
        .unwrap_or_else(|| PathBuf::from(Config::default_path()));
    let mut config = Config::load(&path)?;
    if args.debug {
        config.logging.debug = true;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let coordinator = WatchCoordinator::from_config(&config)
        .with_context(|| format!("No IMAP settings in {} or environment", path.display()))?;
    tracing::info!(
        config = %path.display(),
        filters = config.filters().len(),
        "Starting"
    );

    coordinator.run().await?;
    Ok(())
}
