pub mod error;
pub mod models;
pub mod modules;
pub mod proxy; // Proxy service module
pub mod utils;

use anyhow::Context;
use modules::credentials::{get_ryuu_home, FileCredentialProvider};
use modules::logger;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use proxy::{AxumServer, DomoProxy};

/// Runs the proxy from `ryuu-proxy.json` until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Initialize logger
    logger::init_logger();

    let config = modules::load_app_config(Path::new(modules::CONFIG_FILE))?;
    let manifest = modules::load_manifest(&config.manifest_path)?;
    info!("Proxying for app {} {}", manifest.name, manifest.version);

    let home = match config.ryuu_home.clone() {
        Some(home) => home,
        None => get_ryuu_home().map_err(anyhow::Error::msg)?,
    };
    let credentials = Arc::new(FileCredentialProvider::from_home(&home));
    let domo = DomoProxy::from_config(manifest, &config.proxy, credentials);

    // Resolve the login and apps domain up front so a missing login shows at startup
    let warmup = domo.clone();
    tokio::spawn(async move {
        match warmup.warm_up().await {
            Ok(domain) => info!("Ready to proxy to {}", domain.url),
            Err(e) => error!("{}", e),
        }
    });

    let (server, handle) = AxumServer::start(&config.proxy, domo)
        .await
        .map_err(anyhow::Error::msg)?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    server.stop();
    handle.await?;

    Ok(())
}
