//! Sandbox execution broker — an in-container daemon managing shell
//! sessions, background processes, and a loopback port proxy for a
//! sandboxed Linux container.
//!
//! The same binary plays two roles. Re-exec'd with `__supervisor` as its
//! first argument, it's the two-process control supervisor owning one
//! session's shell. Otherwise it's the daemon: an HTTP server exposing
//! sessions, processes, files, git, and the port proxy.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cmd;

use sandbox_broker::Configuration;

#[derive(Parser)]
#[command(name = "sandbox-broker")]
#[command(about = "In-container sandbox execution broker")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: Configuration,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before clap parsing: supervisor mode reads its configuration
    // from its own environment, not from argv, and never returns.
    if std::env::args().nth(1).as_deref() == Some(sandbox_broker::supervisor::SUPERVISOR_MODE_ARG) {
        sandbox_broker::supervisor::inner::run().await;
    }

    let cli = Cli::parse();

    let log_level = if cli.config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sandbox_broker={log_level}").into()),
        )
        .init();

    info!("Starting sandbox execution broker v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = cmd::root::run(cli.config).await {
        error!("broker error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
