use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cnisync::{FileMetadataClient, SyncConfig, Watcher};

/// Keep CNI network configs in sync with published network metadata
#[derive(Parser)]
#[clap(name = "cnisync", author, version, about)]
struct Cli {
    /// Path to a JSON config file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Metadata snapshot to watch
    #[clap(long, default_value = "/var/lib/cnisync/metadata.json")]
    snapshot: PathBuf,

    /// Override the CNI config root
    #[clap(long)]
    cni_root: Option<PathBuf>,

    /// Enable verbose output
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set default subscriber")?;

    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(root) = cli.cni_root {
        config.cni_root = root;
    }

    info!(
        "Watching {} into {} (reapply every {}s)",
        cli.snapshot.display(),
        config.cni_root.display(),
        config.reapply_interval_secs
    );

    let client = Arc::new(FileMetadataClient::new(cli.snapshot));
    let handle = Watcher::watch(client, &config);

    tokio::select! {
        res = handle => {
            if let Err(err) = res {
                anyhow::bail!("Watcher task ended: {}", err);
            }
        }
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for ctrl-c")?;
            info!("Shutting down");
        }
    }

    Ok(())
}
