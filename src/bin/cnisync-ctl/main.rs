use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cnisync::commands::{cmd_add, cmd_del, cmd_render, cmd_status, read_container_spec};
use cnisync::SyncConfig;

/// Drive CNI plugin chains and inspect rendered network configs
#[derive(Parser)]
#[clap(name = "cnisync-ctl", author, version, about)]
struct Cli {
    /// Path to a JSON config file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Override the CNI config root
    #[clap(long)]
    cni_root: Option<PathBuf>,

    /// Enable verbose output
    #[clap(short, long)]
    verbose: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach a container to its network
    Add {
        /// Container spec JSON (stdin when omitted)
        #[clap(long)]
        spec: Option<PathBuf>,
    },

    /// Detach a container from its network
    Del {
        /// Container spec JSON (stdin when omitted)
        #[clap(long)]
        spec: Option<PathBuf>,
    },

    /// Write the configs of one network record
    Render {
        /// Network record JSON
        #[clap(long)]
        network: PathBuf,
    },

    /// Show the managed link and a network's plugin chain
    Status {
        /// Network mode to resolve (default network when omitted)
        #[clap(long)]
        network: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep stdout clean for results; logs go to stderr
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set default subscriber")?;

    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(root) = cli.cni_root {
        config.cni_root = root;
    }

    match cli.command {
        Commands::Add { spec } => {
            let spec = read_container_spec(spec.as_deref())?;
            cmd_add(&config, &spec)?;
        }

        Commands::Del { spec } => {
            let spec = read_container_spec(spec.as_deref())?;
            cmd_del(&config, &spec)?;
        }

        Commands::Render { network } => {
            let network = cmd_render(&config, &network)?;
            println!(
                "Network {} written to {}",
                network.name,
                config.network_dir(&network.name).display()
            );
        }

        Commands::Status { network } => {
            let status = cmd_status(&config, network.as_deref())?;

            match status.managed_target {
                Some(target) => println!("managed.d -> {}", target),
                None => println!("managed.d is not linked"),
            }
            println!("Network {}:", status.network);
            if status.chain.is_empty() {
                println!("  (no plugin configs)");
            }
            for (i, conf) in status.chain.iter().enumerate() {
                println!("  {}. {}", i + 1, conf);
            }
        }
    }

    Ok(())
}
