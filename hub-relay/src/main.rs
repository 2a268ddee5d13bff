//! keyhub-relay binary entry point.
//!
//! Usage:
//! ```bash
//! keyhub-relay --config keyhub.toml
//! PORT=8080 keyhub-relay
//! ```

use anyhow::Context;
use keyhub_relay::config::Config;
use keyhub_relay::server::{self, Hub};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = get_config_path();
    let mut config = Config::from_file_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.apply_port_override(std::env::var("PORT").ok().as_deref())?;
    config.validate()?;

    tracing::info!("keyhub-relay v{}", env!("CARGO_PKG_VERSION"));
    serve(config).await?;
    Ok(())
}

async fn serve(config: Config) -> keyhub_relay::error::Result<()> {
    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    let hub = Arc::new(Hub::in_memory(config));

    server::run(listener, hub, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("keyhub.toml"))
}
