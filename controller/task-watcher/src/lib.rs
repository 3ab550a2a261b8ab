//! Task Watcher - polls Prometheus for a workload's metrics and logs the results
//!
//! The daemon keeps a registry of metric expressions in three scopes (workload,
//! node, accelerator) plus a table binding accelerator devices to workload
//! instances. A background poller snapshots the registry once per interval,
//! queries the telemetry backend for every registered metric and forwards each
//! outcome to a sink. A small HTTP surface lets an external component register
//! device bindings at runtime.

pub mod backend;
pub mod config;
pub mod daemon;
pub mod metrics;
pub mod poller;
pub mod query;
pub mod registry;
pub mod server;
pub mod sink;

pub use backend::{BackendError, PrometheusBackend, QueryValue, TelemetryBackend};
pub use config::Config;
pub use daemon::TaskWatcher;
pub use metrics::{CycleReport, Metrics};
pub use poller::Poller;
pub use query::{QueryError, QueryPlanner};
pub use registry::{MetricRegistry, MetricScope, PollSnapshot};
pub use sink::{LogSink, QueryRecord, Sink};
