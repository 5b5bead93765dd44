//! Chess Session Server
//!
//! Binary entry point: logging, environment configuration, ctrl-c shutdown.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chess_session::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!("Chess Session Server v{}", VERSION);
    info!(
        replay_dir = %config.replay_dir.display(),
        game_clock_secs = config.game_clock_secs,
        player_clock_secs = config.player_clock_secs,
        max_viewers = config.max_viewers,
        "Configuration loaded"
    );

    let server = Arc::new(GameServer::new(config));

    {
        let server = server.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => server.shutdown(),
                Err(e) => error!("Failed to listen for ctrl-c: {}", e),
            }
        });
    }

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
