use anyhow::Result;
use coretask::{
    api::ApiServer,
    capabilities::{DiskFileStore, NoopAgentFactory, SystemClock, UuidGenerator},
    config::Config,
    coordination::CoordinationManager,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting coordination kernel");

    let config = Config::load()?;
    let file_store = Arc::new(DiskFileStore::new("./workspace"));

    let kernel = CoordinationManager::new(config.clone(), Arc::new(NoopAgentFactory), Arc::new(UuidGenerator), Arc::new(SystemClock), file_store);
    kernel.start().await;

    let api_server = ApiServer::new(&config, kernel.clone());

    tokio::select! {
        result = api_server.run() => {
            if let Err(e) = result {
                tracing::error!("API server failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    kernel.shutdown().await;
    Ok(())
}
