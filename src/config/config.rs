//! Configuration structure and defaults.
//!
//! Bound via `clap`'s `env` feature, so every field can come from either a
//! CLI flag or its matching environment variable, with no backing YAML/TOML
//! file: the environment variables below are the complete configuration
//! surface.

use std::path::PathBuf;

use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct Configuration {
    /// Host to bind the HTTP server to
    #[arg(long, env = "BIND_HOST", default_value = "0.0.0.0")]
    pub bind_host: String,

    /// Port to bind the HTTP server to
    #[arg(long, env = "BIND_PORT", default_value_t = 3000)]
    pub bind_port: u16,

    /// Default timeout for a one-shot `exec`, in milliseconds
    #[arg(long, env = "COMMAND_TIMEOUT_MS", default_value_t = 30_000)]
    pub command_timeout_ms: u64,

    /// Interval between temp-file sweeper passes, in milliseconds
    #[arg(long, env = "CLEANUP_INTERVAL_MS", default_value_t = 30_000)]
    pub cleanup_interval_ms: u64,

    /// Age after which an orphaned temp file is eligible for sweeping
    #[arg(long, env = "TEMP_FILE_MAX_AGE_MS", default_value_t = 60_000)]
    pub temp_file_max_age_ms: u64,

    /// Directory the supervisor writes command temp files into
    #[arg(long, env = "TEMP_DIR", default_value = "/tmp")]
    pub temp_dir: PathBuf,

    /// Enable debug logging (equivalent to RUST_LOG=sandbox_broker=debug)
    #[arg(short, long)]
    pub debug: bool,
}

impl Configuration {
    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.command_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn temp_file_max_age(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.temp_file_max_age_ms)
    }
}
