//! Metric registry shared between the poller and the binding endpoint
//!
//! The registry owns three metric tables (workload, node, accelerator) and the
//! accelerator binding table. Every read and write goes through one mutex so a
//! [`PollSnapshot`] always reflects a single point in the sequence of updates.
//! Critical sections are plain map operations; callers never hold the lock
//! across a query or a sink write.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Label -> backend series name
pub type MetricTable = BTreeMap<String, String>;

/// Device id -> workload instance id
pub type BindingTable = BTreeMap<String, String>;

/// Scope a metric definition is registered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricScope {
    /// Summed per instance of the watched workload
    Workload,
    /// Node-wide, unfiltered
    Node,
    /// Per bound accelerator device
    Accelerator,
}

impl fmt::Display for MetricScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricScope::Workload => write!(f, "workload"),
            MetricScope::Node => write!(f, "node"),
            MetricScope::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// A metric label together with the backend series it reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MetricDefinition {
    pub(crate) label: String,
    pub(crate) series: String,
}

impl MetricDefinition {
    pub(crate) fn new(label: impl Into<String>, series: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            series: series.into(),
        }
    }
}

/// Container metrics watched for every workload by default
pub const DEFAULT_WORKLOAD_METRICS: &[(&str, &str)] = &[
    ("CPU", "container_cpu_usage_seconds_total"),
    ("MEMORY", "container_memory_working_set_bytes"),
    ("NW Res", "container_network_receive_bytes_total"),
    ("NW Trans", "container_network_transmit_bytes_total"),
];

/// NVML exporter series watched for every bound device by default
pub const DEFAULT_ACCELERATOR_METRICS: &[(&str, &str)] = &[
    ("GPU PERCENT", "nvml_gpu_percent"),
    ("GPU MEMORY", "nvml_memory_used"),
    ("GPU WATTS", "nvml_power_watts"),
];

#[derive(Debug, Clone, Default)]
struct Tables {
    workload: MetricTable,
    node: MetricTable,
    accelerator: MetricTable,
    bindings: BindingTable,
}

impl Tables {
    fn metrics_mut(&mut self, scope: MetricScope) -> &mut MetricTable {
        match scope {
            MetricScope::Workload => &mut self.workload,
            MetricScope::Node => &mut self.node,
            MetricScope::Accelerator => &mut self.accelerator,
        }
    }
}

/// Point-in-time copy of every registry table, owned by one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSnapshot {
    pub workload: MetricTable,
    pub node: MetricTable,
    pub accelerator: MetricTable,
    pub bindings: BindingTable,
}

impl PollSnapshot {
    /// Number of queries one cycle over this snapshot issues
    pub fn planned_queries(&self) -> usize {
        self.workload.len() + self.node.len() + self.accelerator.len() * self.bindings.len()
    }
}

/// Process-wide metric registry
#[derive(Debug, Default)]
pub struct MetricRegistry {
    tables: Mutex<Tables>,
}

impl MetricRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with the built-in workload and accelerator metrics
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        {
            let mut tables = registry.lock();
            for (label, series) in DEFAULT_WORKLOAD_METRICS {
                tables.workload.insert(label.to_string(), series.to_string());
            }
            for (label, series) in DEFAULT_ACCELERATOR_METRICS {
                tables
                    .accelerator
                    .insert(label.to_string(), series.to_string());
            }
        }
        registry
    }

    // Every critical section is a single insert or a clone; a poisoned guard
    // still holds consistent tables.
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a metric definition in the given scope
    pub fn add_metric(
        &self,
        scope: MetricScope,
        label: impl Into<String>,
        series: impl Into<String>,
    ) {
        let definition = MetricDefinition::new(label, series);
        debug!(
            scope = %scope,
            label = %definition.label,
            series = %definition.series,
            "Registering metric"
        );
        self.lock()
            .metrics_mut(scope)
            .insert(definition.label, definition.series);
    }

    /// Bind a device to a workload instance, replacing any previous binding
    pub fn set_binding(&self, device_id: impl Into<String>, workload_id: impl Into<String>) {
        let device_id = device_id.into();
        let workload_id = workload_id.into();
        debug!(device_id = %device_id, workload_id = %workload_id, "Setting device binding");
        self.lock().bindings.insert(device_id, workload_id);
    }

    /// Copy all four tables atomically
    pub fn snapshot(&self) -> PollSnapshot {
        let tables = self.lock().clone();
        PollSnapshot {
            workload: tables.workload,
            node: tables.node,
            accelerator: tables.accelerator,
            bindings: tables.bindings,
        }
    }

    /// Copy of the current binding table
    pub fn bindings(&self) -> BindingTable {
        self.lock().bindings.clone()
    }
}
