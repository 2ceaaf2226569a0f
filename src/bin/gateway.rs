//! Gateway binary

use clap::Parser;
use filemesh::common::Config;
use filemesh::Gateway;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "filemesh-gateway")]
#[command(about = "filemesh gateway - routes raw and WebSocket clients to backend nodes")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listener for browser (WebSocket) clients
    #[arg(long)]
    ws_bind: Option<SocketAddr>,

    /// Listener for raw TCP clients
    #[arg(long)]
    raw_bind: Option<SocketAddr>,

    /// Backend node address (repeatable, in registration order)
    #[arg(long = "backend")]
    backends: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load config from file, then override with CLI arguments
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(addr) = args.ws_bind {
        config.gateway.ws_bind = addr;
    }
    if let Some(addr) = args.raw_bind {
        config.gateway.raw_bind = addr;
    }
    if !args.backends.is_empty() {
        config.gateway.backends = args.backends;
    }
    let log_level = args.log_level.unwrap_or(config.log_level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting filemesh gateway {}", filemesh::VERSION);
    tracing::info!("  WebSocket: {}", config.gateway.ws_bind);
    tracing::info!("  Raw TCP: {}", config.gateway.raw_bind);
    tracing::info!("  Backends: {}", config.gateway.backends.join(", "));

    let gateway = Gateway::bind(config.gateway).await?;
    tracing::info!("✓ Gateway ready");
    gateway.serve().await?;

    Ok(())
}
