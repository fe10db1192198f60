//! # TeamChat relay server
//!
//! Realtime channel relay for TeamChat clients.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! teamchat
//!
//! # Run with a specific config file
//! TEAMCHAT_CONFIG=/path/to/teamchat.toml teamchat
//!
//! # Run with environment variables
//! TEAMCHAT_PORT=8080 TEAMCHAT_HOST=0.0.0.0 teamchat
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
                .unwrap_or_else(|_| "teamchat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting TeamChat relay on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
