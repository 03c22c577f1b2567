//! # Study Hall Server
//!
//! Room hub for Study Hall sessions: presence, chat and timer relays over
//! WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! studyhall
//!
//! # Run with custom config
//! studyhall --config /path/to/studyhall.toml
//!
//! # Run with environment variables
//! STUDYHALL_PORT=8080 STUDYHALL_HOST=0.0.0.0 studyhall
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "studyhall=debug,studyhall_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match config_path_arg() {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Study Hall server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}

fn config_path_arg() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}
