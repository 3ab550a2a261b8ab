//! Integration tests for the watch loop
//!
//! Tests cover:
//! - Accelerator fan-out over the binding table
//! - Skipping empty scopes
//! - Per-query failure isolation
//! - Binding changes taking effect on the next cycle
//! - Clean shutdown of the background loop
//! - Registry updates from inside a running cycle

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use task_watcher::{
    backend::{BackendError, QueryValue, Sample, SamplePair},
    MetricRegistry, MetricScope, Poller, QueryPlanner, QueryRecord, Sink, TelemetryBackend,
};
use tokio::sync::watch;

#[tokio::test]
async fn test_accelerator_metrics_fan_out_over_bindings() {
    // Given: 2 accelerator metrics and 3 bindings, nothing else
    let registry = MetricRegistry::new();
    registry.add_metric(MetricScope::Accelerator, "GPU PERCENT", "nvml_gpu_percent");
    registry.add_metric(MetricScope::Accelerator, "GPU WATTS", "nvml_power_watts");
    registry.set_binding("GPU-1", "pod-a");
    registry.set_binding("GPU-2", "pod-b");
    registry.set_binding("GPU-3", "pod-c");

    let (poller, backend, sink) = create_poller(registry, "tfrun", None);

    // When
    let report = poller.run_cycle().await;

    // Then: exactly one query per (metric, binding) pair
    assert_eq!(report.issued, 6);
    assert_eq!(backend.queries().len(), 6);
    for device in ["GPU-1", "GPU-2", "GPU-3"] {
        let filter = format!("device_uuid=\"{}\"", device);
        assert_eq!(
            backend.queries().iter().filter(|q| q.contains(&filter)).count(),
            2,
            "each device is queried once per accelerator metric"
        );
    }

    let records = sink.records();
    assert!(records
        .iter()
        .any(|r| r.line().starts_with("GPU WATTS in pod-b\n")));
}

#[tokio::test]
async fn test_empty_node_table_issues_no_node_query() {
    // Given: the built-in tables (node table empty)
    let (poller, backend, sink) = create_poller(MetricRegistry::with_defaults(), "tfrun", None);

    // When
    let report = poller.run_cycle().await;

    // Then: only the 4 workload queries run and nothing failed
    assert_eq!(report.issued, 4);
    assert!(report.skipped.contains(&MetricScope::Node));
    assert!(backend.queries().iter().all(|q| q.contains("pod_name=~\"^tfrun.*\"")));
    assert!(sink.records().iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn test_failed_query_does_not_abort_cycle() {
    // Given: the backend fails every memory query
    let registry = MetricRegistry::with_defaults();
    registry.add_metric(MetricScope::Node, "LOAD", "node_load1");
    let (poller, backend, sink) =
        create_poller(registry, "tfrun", Some("container_memory_working_set_bytes"));

    // When
    let report = poller.run_cycle().await;

    // Then: every query was still attempted and the failure was emitted
    assert_eq!(report.issued, 5);
    assert_eq!(report.failed, 1);
    assert_eq!(backend.queries().len(), 5);

    let failures: Vec<QueryRecord> = sink.records().into_iter().filter(|r| !r.is_ok()).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].line().starts_with("MEMORY\nError "));
    assert!(sink
        .records()
        .iter()
        .any(|r| r.label == "LOAD" && r.query == "node_load1{}" && r.is_ok()));
}

#[tokio::test]
async fn test_binding_takes_effect_on_next_cycle() {
    let registry = Arc::new(MetricRegistry::with_defaults());
    let backend = Arc::new(RecordingBackend::default());
    let sink = Arc::new(CaptureSink::default());
    let poller = Poller::new(
        Arc::clone(&registry),
        QueryPlanner::new("tfrun"),
        Arc::clone(&backend),
        Arc::clone(&sink),
        Duration::from_secs(1),
    );

    let first = poller.run_cycle().await;
    assert!(first.skipped.contains(&MetricScope::Accelerator));

    registry.set_binding("GPU-9", "pod-z");

    let second = poller.run_cycle().await;
    assert!(!second.skipped.contains(&MetricScope::Accelerator));
    assert_eq!(second.issued, 4 + 3);
    assert_eq!(
        sink.records()
            .iter()
            .filter(|r| r.instance.as_deref() == Some("pod-z"))
            .count(),
        3
    );
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() {
    let (poller, backend, _sink) =
        create_poller_with_interval(MetricRegistry::with_defaults(), Duration::from_millis(20));
    let poller = Arc::new(poller);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = {
        let poller = Arc::clone(&poller);
        tokio::spawn(async move { poller.run(shutdown_rx).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("poller should stop after shutdown")
        .unwrap();

    // First tick fires immediately, so at least one full cycle ran
    assert!(backend.queries().len() >= 4);
}

#[tokio::test]
async fn test_run_stops_when_shutdown_sender_dropped() {
    let (poller, _backend, _sink) =
        create_poller_with_interval(MetricRegistry::new(), Duration::from_millis(20));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    drop(shutdown_tx);

    tokio::time::timeout(Duration::from_secs(2), poller.run(shutdown_rx))
        .await
        .expect("poller should stop once the sender is gone");
}

#[tokio::test]
async fn test_registry_writable_while_cycle_queries() {
    // Given: the built-in tables and one binding; every query updates the registry
    let registry = Arc::new(MetricRegistry::with_defaults());
    registry.set_binding("GPU-1", "pod-a");

    let backend = Arc::new(MutatingBackend {
        registry: Arc::clone(&registry),
        queries: Mutex::new(Vec::new()),
    });
    let poller = Poller::new(
        Arc::clone(&registry),
        QueryPlanner::new("tfrun"),
        Arc::clone(&backend),
        Arc::new(CaptureSink::default()),
        Duration::from_secs(1),
    );

    // When: the first cycle runs
    let first = tokio::time::timeout(Duration::from_secs(5), poller.run_cycle())
        .await
        .expect("cycle should not block on the registry");

    // Then: every write went through, none of it visible mid-cycle
    assert_eq!(first.failed, 0, "registry writes from the backend must not block");
    assert_eq!(first.issued, 7);
    assert_eq!(first.skipped, vec![MetricScope::Node]);
    assert!(backend
        .queries()
        .iter()
        .all(|q| !q.contains("GPU-2") && !q.contains("node_load1")));

    // And: the next cycle picks up the new node metric and binding
    let second = tokio::time::timeout(Duration::from_secs(5), poller.run_cycle())
        .await
        .expect("cycle should not block on the registry");

    // 4 workload + 1 node + 3 accelerator x 2 bindings
    assert_eq!(second.failed, 0);
    assert_eq!(second.issued, 11);
    assert!(second.skipped.is_empty());
}

// Helper types

/// Writes to the registry from every query. The write runs on its own thread
/// and gives up after a second, so a lock held by the caller shows up as a
/// failed query instead of a hung test.
struct MutatingBackend {
    registry: Arc<MetricRegistry>,
    queries: Mutex<Vec<String>>,
}

impl MutatingBackend {
    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryBackend for MutatingBackend {
    async fn query(&self, expression: &str, at: DateTime<Utc>) -> Result<QueryValue, BackendError> {
        self.queries.lock().unwrap().push(expression.to_string());

        let registry = Arc::clone(&self.registry);
        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            registry.set_binding("GPU-2", "pod-b");
            registry.add_metric(MetricScope::Node, "LOAD", "node_load1");
            let _ = done_tx.send(());
        });

        if done_rx.recv_timeout(Duration::from_secs(1)).is_err() {
            return Err(BackendError::Api {
                error_type: "timeout".to_string(),
                message: "registry write blocked".to_string(),
            });
        }

        Ok(QueryValue::Scalar(SamplePair(at.timestamp() as f64, "1".to_string())))
    }
}

/// Records every query; fails those containing `fail_on`
#[derive(Default)]
struct RecordingBackend {
    queries: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl RecordingBackend {
    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryBackend for RecordingBackend {
    async fn query(&self, expression: &str, at: DateTime<Utc>) -> Result<QueryValue, BackendError> {
        self.queries.lock().unwrap().push(expression.to_string());

        if let Some(pattern) = &self.fail_on {
            if expression.contains(pattern.as_str()) {
                return Err(BackendError::Api {
                    error_type: "execution".to_string(),
                    message: "query timed out".to_string(),
                });
            }
        }

        Ok(QueryValue::Vector(vec![Sample {
            metric: Default::default(),
            value: SamplePair(at.timestamp() as f64, "1".to_string()),
        }]))
    }
}

#[derive(Default)]
struct CaptureSink {
    records: Mutex<Vec<QueryRecord>>,
}

impl CaptureSink {
    fn records(&self) -> Vec<QueryRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl Sink for CaptureSink {
    fn emit(&self, record: &QueryRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

type TestPoller = Poller<RecordingBackend, CaptureSink>;

fn create_poller(
    registry: MetricRegistry,
    workload: &str,
    fail_on: Option<&str>,
) -> (TestPoller, Arc<RecordingBackend>, Arc<CaptureSink>) {
    let backend = Arc::new(RecordingBackend {
        queries: Mutex::new(Vec::new()),
        fail_on: fail_on.map(str::to_string),
    });
    let sink = Arc::new(CaptureSink::default());
    let poller = Poller::new(
        Arc::new(registry),
        QueryPlanner::new(workload),
        Arc::clone(&backend),
        Arc::clone(&sink),
        Duration::from_secs(1),
    );
    (poller, backend, sink)
}

fn create_poller_with_interval(
    registry: MetricRegistry,
    interval: Duration,
) -> (TestPoller, Arc<RecordingBackend>, Arc<CaptureSink>) {
    let backend = Arc::new(RecordingBackend::default());
    let sink = Arc::new(CaptureSink::default());
    let poller = Poller::new(
        Arc::new(registry),
        QueryPlanner::new("tfrun"),
        Arc::clone(&backend),
        Arc::clone(&sink),
        interval,
    );
    (poller, backend, sink)
}
