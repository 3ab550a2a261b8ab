//! Task Watcher binary - polls Prometheus for a workload and serves the binding endpoint

use anyhow::Context;
use std::sync::Arc;
use task_watcher::{Config, LogSink, PrometheusBackend, TaskWatcher};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse_config();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting Task Watcher");
    info!("Configuration:");
    info!("  Prometheus: {}", config.prometheus_url());
    info!("  Task: {}", config.task_name);
    info!("  Poll interval: {}s", config.poll_interval_secs);
    info!("  Query timeout: {}s", config.query_timeout_secs);

    let backend = PrometheusBackend::new(&config.prometheus_url(), config.query_timeout())
        .context("Failed to init Prometheus client")?;

    let watcher = TaskWatcher::new(&config, Arc::new(backend), Arc::new(LogSink));
    info!("Watching workload {}", watcher.task_name());

    match watcher.run().await {
        Ok(()) => {
            info!("Task watcher exited normally");
            Ok(())
        }
        Err(e) => {
            error!("Task watcher failed: {:#}", e);
            Err(e)
        }
    }
}
