//! strata gateway binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use common::Config;
use gateway::state::GatewayState;

/// Encrypting, replicating S3-compatible gateway.
#[derive(Parser, Debug)]
#[command(name = "strata-gateway", version, about)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "configs/main.yaml")]
    config: PathBuf,

    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)
        .with_context(|| format!("cannot load config from {}", args.config.display()))?;

    let state = GatewayState::from_config(&cfg).context("cannot build gateway state")?;
    if state.registry.is_empty() {
        tracing::warn!("no logical buckets configured; only passthrough will fail");
    }

    let listen_addr = args.listen.unwrap_or_else(|| cfg.listen_addr.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    });

    gateway::serve(&listen_addr, state, shutdown_rx).await
}
