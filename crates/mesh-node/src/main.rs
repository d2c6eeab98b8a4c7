use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mesh_node::{AppContext, Cli, NodeConfig, NodeServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, config_path) = NodeConfig::resolve(&cli)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &config_path {
        Some(path) => tracing::info!(path = %path.display(), "Loaded configuration"),
        None => tracing::info!("No configuration file found, using defaults"),
    }

    let ctx = AppContext::from_config(&config).context("failed to build agent network")?;
    let server = NodeServer::new(config.network.listen_addr.clone(), ctx.clone());
    server.run(shutdown_signal()).await?;

    tracing::info!("Draining background executions");
    ctx.network.drain_background().await;
    tracing::info!("Mesh node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Ctrl-C handler unavailable, running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
