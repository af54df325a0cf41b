//! Main daemon command - starts the daemon server

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sandbox_broker::router::{self, AppState};
use sandbox_broker::supervisor::tempfiles::spawn_sweeper;
use sandbox_broker::Configuration;

/// Run the main daemon
pub async fn run(config: Configuration) -> Result<()> {
    let config = Arc::new(config);

    info!("  bind: {}:{}", config.bind_host, config.bind_port);
    info!("  temp dir: {}", config.temp_dir.display());
    info!("  command timeout: {}ms", config.command_timeout_ms);

    let state = AppState::new(config.clone());
    let app = router::build_router(state.clone());

    let shutdown_token = CancellationToken::new();

    // Per-command temp files are cleaned up inline as each command
    // finishes (supervisor::inner); this sweeper only catches files
    // orphaned by a crashed supervisor, so it's fine for it to treat
    // nothing as "active" — anything it finds has already outlived a
    // command's own lifecycle.
    let sweeper = spawn_sweeper(
        config.temp_dir.clone(),
        config.cleanup_interval(),
        config.temp_file_max_age(),
        || HashSet::new(),
        shutdown_token.clone(),
    );

    let bind_addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port)
        .parse()
        .expect("invalid bind address");

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let shutdown_state = state.clone();
    let shutdown_token_clone = shutdown_token.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
        warn!("received shutdown signal, stopping sessions and processes...");

        shutdown_token_clone.cancel();
        shutdown_state.processes.kill_all(None).await;
        shutdown_state.sessions.destroy_all().await;

        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    info!("listening on {}", bind_addr);
    axum_server::bind(bind_addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    sweeper.abort();
    debug!("broker stopped");
    Ok(())
}
