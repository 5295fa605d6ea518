//! budgetwatch server
//!
//! Run with: cargo run
//!
//! Configuration comes from `BUDGETWATCH_*` environment variables (see
//! `budgetwatch::config`). Log filtering uses RUST_LOG (default:
//! budgetwatch=info,tower_http=info).

use budgetwatch::api::run_server;
use budgetwatch::MonitorConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "budgetwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MonitorConfig::from_env()?;

    tracing::info!("budgetwatch configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!(
        "  Collection interval: {} seconds",
        config.collector.interval.as_secs()
    );
    tracing::info!(
        "  Evaluation interval: {} seconds",
        config.evaluator.interval.as_secs()
    );
    tracing::info!(
        "  Probe timeout: {} seconds",
        config.collector.probe_timeout.as_secs()
    );
    tracing::info!("  Alert recipients: {}", config.evaluator.recipients.len());
    tracing::info!("  Integrations: {}", config.integrations.len());
    for integration in &config.integrations {
        match &integration.url {
            Some(url) => tracing::info!("    - {} @ {}", integration.name, url),
            None => tracing::info!("    - {} (not configured)", integration.name),
        }
    }
    match &config.data_dir {
        Some(dir) => tracing::info!(
            "  Storage probe: {} (quota {} MB)",
            dir.display(),
            config.storage_quota_bytes / (1024 * 1024)
        ),
        None => tracing::info!("  Storage probe: DISABLED"),
    }

    run_server(config).await
}
