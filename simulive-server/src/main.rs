//! Simulive - Stream Server
//!
//! Serves the authoritative clock, stream metadata and playback tokens,
//! with a terminal dashboard.
//!
//! Usage:
//!   cargo run --release
//!   cargo run --release -- --no-dashboard  # Plain logging mode
//!
//! Configuration is read from the TOML file named by `SIMULIVE_CONFIG`,
//! then overridden by environment variables (`BIND_ADDRESS`, `ADMIN_TOKEN`, ...).

mod api;
mod assets;
mod auth;
mod config;
mod dashboard;
mod metrics;
mod server;
mod store;
mod tokens;

use std::sync::Arc;
use parking_lot::RwLock;

#[tokio::main]
async fn main() -> server::ServerResult<()> {
    let args: Vec<String> = std::env::args().collect();
    let use_dashboard = !args.contains(&"--no-dashboard".to_string());

    let config = config::ServerConfig::load()?;

    // Shared metrics state
    let metrics = Arc::new(RwLock::new(metrics::Metrics::new()));

    if use_dashboard {
        dashboard::run(config, metrics).await
    } else {
        server::run_with_logging(config, metrics).await
    }
}
