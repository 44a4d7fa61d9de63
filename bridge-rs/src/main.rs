//! bridge-server: HTTP API for the migration wizard
//!
//! Serves the wizard state endpoints and streams migration progress.

use bridge_rs::api::ApiServer;
use bridge_rs::clients::RestClientFactory;
use bridge_rs::config::Config;
use bridge_rs::storage::open_store;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration: first argument, BRIDGE_CONFIG, or ./config.toml when present
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BRIDGE_CONFIG").ok())
        .map(PathBuf::from)
        .or_else(|| {
            let default = PathBuf::from("config.toml");
            default.exists().then_some(default)
        });

    let config = Config::load(config_path.as_deref())?;
    config.logging.init()?;

    info!("Starting bridge-server v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No config file found, using defaults"),
    }
    info!("  API listening on: {}", config.server.listen_addr);
    info!("  Wizard namespace: {}", config.migration.namespace);
    info!("  Batch size: {}", config.migration.batch_size);
    info!(
        "  Target throttle: {} requests / {}s, {} in flight",
        config.throttle.requests_per_window,
        config.throttle.window_secs,
        config.throttle.max_in_flight
    );

    let store = open_store(&config).await?;
    let server = ApiServer::new(config, store, Arc::new(RestClientFactory));
    server.run().await?;

    Ok(())
}
