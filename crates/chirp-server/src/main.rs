//! # Chirp Server
//!
//! Chat broadcast server: clients publish over HTTP and either poll for new
//! messages or hold a server-sent event stream open.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chirp
//!
//! # Run with a custom config file
//! CHIRP_CONFIG=/path/to/chirp.toml chirp
//!
//! # Run with environment variables
//! CHIRP_PORT=8080 CHIRP_HOST=0.0.0.0 chirp
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chirp=debug,chirp_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        topics = config.topics.len(),
        "Starting Chirp server on {}:{}",
        config.host,
        config.port
    );

    handlers::run_server(config).await?;

    Ok(())
}
