//! Jukebox offline cache - cache-first proxy for the jukebox web app
//!
//! Installs the current cache generation, purges stale ones, then serves
//! requests from the cache with the origin as fallback.

use generation_cache::{CacheStorage, FileCacheStorage, MemoryCacheStorage};
use jukebox_offline::{
    start_server, CacheLifecycle, HttpNetwork, OfflineConfig, Result, ServerState, SharedState,
    StorageBackend, WorkerHost,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("jukebox_offline=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting jukebox offline cache...");

    let config = OfflineConfig::from_env()?;
    info!("Port: {}", config.port);
    info!("Origin: {}", config.origin);
    info!("Cache name: {}", config.cache_name);
    info!("Assets: {}", config.assets.len());
    info!("Install policy: {}", config.install_policy);

    let storage: Arc<dyn CacheStorage> = match config.backend {
        StorageBackend::File => {
            info!("Cache dir: {:?}", config.cache_dir);
            let storage = FileCacheStorage::new(config.cache_dir.clone());
            storage.init().await?;
            Arc::new(storage)
        }
        StorageBackend::Memory => Arc::new(MemoryCacheStorage::new()),
    };
    let network = Arc::new(HttpNetwork::new()?);

    let handler = CacheLifecycle::new(
        config.cache_name.clone(),
        config.asset_keys()?,
        storage,
        network,
    )
    .with_policy(config.install_policy);
    let host = WorkerHost::new(handler);

    if let Err(e) = host.start().await {
        error!(error = %e, "Worker failed to start");
        return Err(e);
    }

    let state: SharedState = Arc::new(ServerState::new(host, config.origin.clone()));

    // Start HTTP server (blocking)
    start_server(state, config.port).await?;

    Ok(())
}
