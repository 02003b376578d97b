mod apps;
mod config;
mod dispatch;
mod listener;
mod reload;
mod server;
mod service;
mod tls;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::GatehouseConfig;
use crate::server::RunningServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    // Parse command-line args for config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/gatehouse.yaml".to_string());

    info!(config_path = %config_path, "starting Gatehouse");

    let source = GatehouseConfig::load(&config_path)?;
    let server = RunningServer::start(source).await?;

    for addr in &server.local_addrs {
        info!(addr = %addr, "accepting connections");
    }

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C");

    server.shutdown().await;
    Ok(())
}
