//! Watch loop - snapshots the registry and queries every registered metric

use crate::backend::TelemetryBackend;
use crate::metrics::{CycleReport, Metrics};
use crate::query::{QueryError, QueryPlanner};
use crate::registry::{MetricRegistry, MetricScope};
use crate::sink::{QueryRecord, Sink};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Poller - issues one query per registered metric (per binding for
/// accelerator metrics) every interval and forwards each outcome to the sink
pub struct Poller<B: TelemetryBackend, S: Sink> {
    registry: Arc<MetricRegistry>,
    planner: QueryPlanner,
    backend: Arc<B>,
    sink: Arc<S>,
    interval: Duration,
    metrics: Metrics,
}

impl<B: TelemetryBackend, S: Sink> Poller<B, S> {
    /// Create a new poller
    pub fn new(
        registry: Arc<MetricRegistry>,
        planner: QueryPlanner,
        backend: Arc<B>,
        sink: Arc<S>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            planner,
            backend,
            sink,
            interval,
            metrics: Metrics,
        }
    }

    /// Run poll cycles until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A cycle that is already running finishes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            workload = %self.planner.workload(),
            interval_secs = self.interval.as_secs_f64(),
            "Starting poller"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown sender dropped");
                        break;
                    }
                }
            }
        }

        info!("Poller stopped");
    }

    /// Run a single poll cycle against a fresh registry snapshot
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let at = Utc::now();
        let snapshot = self.registry.snapshot();
        let mut report = CycleReport::default();

        debug!(
            planned = snapshot.planned_queries(),
            bindings = snapshot.bindings.len(),
            "Starting poll cycle"
        );

        if snapshot.workload.is_empty() {
            self.skip(MetricScope::Workload, &mut report);
        } else {
            for (label, series) in &snapshot.workload {
                let rendered = self.planner.workload_query(series);
                self.execute(label, None, rendered, at, &mut report).await;
            }
        }

        if snapshot.node.is_empty() {
            self.skip(MetricScope::Node, &mut report);
        } else {
            for (label, series) in &snapshot.node {
                let rendered = self.planner.node_query(series);
                self.execute(label, None, rendered, at, &mut report).await;
            }
        }

        if snapshot.accelerator.is_empty() || snapshot.bindings.is_empty() {
            self.skip(MetricScope::Accelerator, &mut report);
        } else {
            for (label, series) in &snapshot.accelerator {
                for (device_id, instance) in &snapshot.bindings {
                    let rendered = self.planner.accelerator_query(series, device_id);
                    self.execute(label, Some(instance.as_str()), rendered, at, &mut report)
                        .await;
                }
            }
        }

        self.metrics.record_cycle(&report, started.elapsed());
        report
    }

    fn skip(&self, scope: MetricScope, report: &mut CycleReport) {
        self.metrics.record_skipped(scope);
        report.skipped.push(scope);
    }

    /// Issue one rendered query and emit its outcome. Never fails: errors
    /// become error records so the rest of the cycle still runs.
    async fn execute(
        &self,
        label: &str,
        instance: Option<&str>,
        rendered: Result<String, QueryError>,
        at: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let (query, outcome) = match rendered {
            Ok(query) => {
                report.issued += 1;
                let outcome = match self.backend.query(&query, at).await {
                    Ok(value) => Ok(value.to_string()),
                    Err(e) => {
                        report.failed += 1;
                        Err(e.to_string())
                    }
                };
                (query, outcome)
            }
            Err(e) => {
                report.rejected += 1;
                (String::new(), Err(e.to_string()))
            }
        };

        self.sink.emit(&QueryRecord {
            label: label.to_string(),
            instance: instance.map(str::to_string),
            query,
            outcome,
        });
    }
}
