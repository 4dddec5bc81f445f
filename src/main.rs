use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arena_sync_server::config::ServerConfig;
use arena_sync_server::metrics::{self, Metrics};
use arena_sync_server::net::GameServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Arena Sync Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: {} tcp={} udp={}, {} rooms x {} players",
        config.bind_address,
        config.tcp_port,
        config.udp_port,
        config.game_rooms,
        config.max_players_per_room
    );

    let metrics = Arc::new(Metrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let server = GameServer::bind(config, metrics).await?;
    let rooms = server.rooms().clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run(shutdown_rx) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    let _ = shutdown_tx.send(true);
    rooms.close_all();
    info!("Server stopped");

    Ok(())
}
