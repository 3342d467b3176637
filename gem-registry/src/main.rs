//! Gem registry server CLI binary

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gem_registry::{rebuild_all, run_server, Config};
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_CONFIG: &str = "/etc/gemfast/config.json";

#[derive(Parser)]
#[command(name = "gem-registry")]
#[command(about = "Private RubyGems registry with a pull-through mirror")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file; defaults apply when it does not exist
    #[arg(long, default_value = DEFAULT_CONFIG, global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the registry server
    Start {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for archives, indexes and the metadata store
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Rebuild the index of every namespace on disk and exit
    Index {
        /// Data directory for archives, indexes and the metadata store
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn load_config(path: &Path, dir: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::load_or_default(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.apply_env();
    if let Some(dir) = dir {
        config.storage.dir = dir;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = gem_logging::init_subscriber();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { host, port, dir } => {
            let mut config = load_config(&cli.config, dir)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        Commands::Index { dir } => {
            let config = load_config(&cli.config, dir)?;
            tokio::task::spawn_blocking(move || rebuild_all(config))
                .await
                .context("index task panicked")??;
            info!("index rebuild complete");
            Ok(())
        }
    }
}
