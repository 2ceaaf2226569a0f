//! Backend node binary

use clap::Parser;
use filemesh::common::{Config, StoreBackend, Storage};
use filemesh::{Node, NodeServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "filemesh-node")]
#[command(about = "filemesh backend node - document store and coordinator election")]
#[command(version)]
struct Args {
    /// TCP port to listen on
    port: u16,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Document store backend (memory, sled)
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Data directory for the sled backend
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Preload the sample documents
    #[arg(long)]
    seed_samples: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load config from file, then override with CLI arguments
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(store) = args.store {
        config.node.store = store;
    }
    if let Some(data_dir) = args.data_dir {
        config.node.data_dir = data_dir;
    }
    config.node.seed_samples |= args.seed_samples;
    let log_level = args.log_level.unwrap_or(config.log_level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting filemesh node {}", filemesh::VERSION);
    tracing::info!("  Port: {}", args.port);
    tracing::info!("  Store: {:?}", config.node.store);

    if config.node.store == StoreBackend::Sled {
        tokio::fs::create_dir_all(&config.node.data_dir).await?;
    }
    let storage = Storage::open(&config.node, args.port)?;
    if config.node.seed_samples {
        let added = storage.seed_samples()?;
        tracing::info!(added, "sample documents loaded");
    }

    let server = NodeServer::bind((config.node.host.as_str(), args.port), Node::new(storage)).await?;
    tracing::info!("✓ Node ready on {}", server.local_addr()?);
    server.serve().await?;

    Ok(())
}
