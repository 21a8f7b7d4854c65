//! chap relay: routes edits, cursors and presence between editors.
//!
//! Usage: `chap-relay [BIND_ADDR] [STORAGE_DIR]`
//!
//! The bind address falls back to `CHAP_RELAY_ADDR`, then `127.0.0.1:9090`.
//! The storage directory falls back to `CHAP_RELAY_STORAGE`; without one,
//! change logs are not persisted.

use log::{error, info};
use std::path::PathBuf;

use chap_collab::server::{RelayConfig, RelayServer};

fn config_from_env() -> RelayConfig {
    let mut args = std::env::args().skip(1);
    let defaults = RelayConfig::default();

    let bind_addr = args
        .next()
        .or_else(|| std::env::var("CHAP_RELAY_ADDR").ok())
        .unwrap_or(defaults.bind_addr);
    let storage_path = args
        .next()
        .or_else(|| std::env::var("CHAP_RELAY_STORAGE").ok())
        .map(PathBuf::from);

    RelayConfig {
        bind_addr,
        storage_path,
        ..RelayConfig::default()
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = config_from_env();
    info!("Starting chap relay on {}...", config.bind_addr);

    let server = match RelayServer::open(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to open storage: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Relay stopped: {e}");
        std::process::exit(1);
    }
}
