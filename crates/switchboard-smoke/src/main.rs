//! # Switchboard Smoke
//!
//! Drives one full session through the Switchboard facade against the
//! in-process reference backend: connect, subscribe, publish, presence,
//! destroy.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! switchboard-smoke
//!
//! # Run with a custom config
//! SWITCHBOARD_CONFIG=/path/to/switchboard.toml switchboard-smoke
//!
//! # Run with environment variables
//! SWITCHBOARD_MESSAGES=1000 SWITCHBOARD_METRICS=1 switchboard-smoke
//! ```

mod config;
mod metrics;
mod scenario;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    tracing::info!(
        channel = %config.scenario.channel,
        messages = config.scenario.messages,
        "Starting smoke run"
    );

    let report = scenario::run(&config).await?;

    tracing::info!(
        provider = %report.provider,
        published = report.published,
        received = report.received,
        history = report.history,
        presence_members = report.presence_members,
        authenticated = report.authenticated,
        elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
        "Smoke run complete"
    );

    Ok(())
}
