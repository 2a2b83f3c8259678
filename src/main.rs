use anyhow::{anyhow, Context, Result};
use downloads_exporter::aggregator::Aggregator;
use downloads_exporter::config::{Config, Settings};
use downloads_exporter::server::create_router;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("initialize tracing subscriber")?;

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal exporter error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let settings = Settings::load().context("load settings from environment")?;

    let config = Config::from_file(&settings.config_file)
        .with_context(|| format!("read config {}", settings.config_file.display()))?;

    let aggregator = Aggregator::from_config(&config, settings.fetch_timeout())
        .context("create exporter")?;

    info!(
        fetchers = aggregator.fetcher_names().count(),
        labels = ?aggregator.labels(),
        timeout = ?aggregator.fetch_timeout(),
        "downloads exporter configured"
    );

    let app = create_router(Arc::new(aggregator), &settings.metrics_path);
    let listener = tokio::net::TcpListener::bind(settings.listen_address)
        .await
        .with_context(|| format!("bind {}", settings.listen_address))?;

    info!(
        address = %settings.listen_address,
        metrics_path = %settings.metrics_path,
        "HTTP server starting"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve HTTP")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl_c listener error");
    }
    info!("Shutdown signal received, exiting");
}

fn init_tracing() -> Result<()> {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber init: {err}"))
}
