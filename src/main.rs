//! Scoped storage arbiter - Entry Point

use log::{error, info, warn};
use std::sync::Arc;

use scoped_storage_arbiter::{Arbiter, GrantRegistry, InMemoryIndex, Server, ServerConfig};

#[tokio::main]
async fn main() {
    // Initialize the logger (env_logger picks up RUST_LOG environment variable)
    env_logger::init();

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let (startup, runtime, packages) = config.split();

    info!("Launching scoped storage arbiter...");

    let grants = Arc::new(GrantRegistry::from_packages(packages));
    if grants.is_empty() {
        warn!("No packages configured; no caller can authenticate");
    } else {
        info!("Loaded grants for {} packages", grants.len());
    }
    let arbiter = Arc::new(Arbiter::with_page_size(
        startup.storage_root_path(),
        Arc::new(InMemoryIndex::new()),
        grants,
        startup.page_size,
    ));

    if let Err(e) = arbiter.prepare_layout() {
        error!(
            "Failed to prepare storage root {}: {}",
            startup.storage_root, e
        );
        std::process::exit(1);
    }

    let server = match Server::bind(&startup, runtime, arbiter).await {
        Ok(server) => server,
        Err(_) => std::process::exit(1),
    };
    server.start().await;
}
