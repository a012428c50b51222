//! Pong Relay Server
//!
//! Relays gameplay events between two browser players and keeps a win
//! leaderboard. Configuration comes from the environment; see
//! [`ServerConfig::from_env`].

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pong_relay::{
    leaderboard::LeaderboardStore, FileStore, Leaderboard, MemoryStore, RelayServer, ServerConfig,
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    info!("Pong Relay Server v{}", VERSION);
    info!("Allowed origin: {}", config.allowed_origin);

    let store: Arc<dyn LeaderboardStore> = match &config.leaderboard_path {
        Some(path) => {
            info!("Leaderboard file: {}", path.display());
            Arc::new(FileStore::new(path))
        }
        None => {
            info!("Leaderboard kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let server = Arc::new(RelayServer::new(config, Leaderboard::new(store)));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("relay server failed")?;

    info!("Server stopped");
    Ok(())
}
