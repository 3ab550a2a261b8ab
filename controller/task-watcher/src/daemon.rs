//! Daemon wiring: poller task plus the binding endpoint

use crate::backend::TelemetryBackend;
use crate::config::{Config, LISTEN_ADDR};
use crate::poller::Poller;
use crate::query::QueryPlanner;
use crate::registry::{MetricRegistry, MetricScope};
use crate::server;
use crate::sink::Sink;
use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Task watcher - owns the registry and hands it to the poller and the router
pub struct TaskWatcher<B: TelemetryBackend, S: Sink> {
    task_name: String,
    registry: Arc<MetricRegistry>,
    poller: Arc<Poller<B, S>>,
}

impl<B, S> TaskWatcher<B, S>
where
    B: TelemetryBackend + 'static,
    S: Sink + 'static,
{
    /// Create a watcher with the built-in metric tables
    pub fn new(config: &Config, backend: Arc<B>, sink: Arc<S>) -> Self {
        Self::with_registry(config, Arc::new(MetricRegistry::with_defaults()), backend, sink)
    }

    /// Create a watcher around an existing registry
    pub fn with_registry(
        config: &Config,
        registry: Arc<MetricRegistry>,
        backend: Arc<B>,
        sink: Arc<S>,
    ) -> Self {
        let poller = Poller::new(
            Arc::clone(&registry),
            QueryPlanner::new(config.task_name.clone()),
            backend,
            sink,
            config.poll_interval(),
        );

        Self {
            task_name: config.task_name.clone(),
            registry,
            poller: Arc::new(poller),
        }
    }

    /// Name of the watched workload
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn registry(&self) -> Arc<MetricRegistry> {
        Arc::clone(&self.registry)
    }

    /// Register an extra metric; picked up from the next poll cycle
    pub fn add_metric(
        &self,
        scope: MetricScope,
        label: impl Into<String>,
        series: impl Into<String>,
    ) {
        self.registry.add_metric(scope, label, series);
    }

    pub fn router(&self) -> Router {
        server::create_app(self.registry())
    }

    /// Bind the fixed listen address and run until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(LISTEN_ADDR)
            .await
            .with_context(|| format!("Failed to bind {}", LISTEN_ADDR))?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` with the poller running in the background until
    /// `signal` resolves, then stop the poller and wait for it
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = Arc::clone(&self.poller);
        let poller_handle = tokio::spawn(async move { poller.run(shutdown_rx).await });

        let addr = listener
            .local_addr()
            .context("Failed to read listener address")?;
        info!("Task watcher listening on {}", addr);

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP server stopped, stopping poller");
        if shutdown_tx.send(true).is_err() {
            warn!("Poller exited before shutdown was signalled");
        }
        if let Err(e) = poller_handle.await {
            error!("Poller task failed: {}", e);
        }

        served.context("HTTP server failed")
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
