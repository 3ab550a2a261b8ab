//! Poll cycle statistics
//!
//! NOTE: there is no Prometheus exporter here; the watcher reports on itself
//! through structured logging like everything else it emits.

use crate::registry::MetricScope;
use std::time::Duration;
use tracing::{debug, info};

/// What one poll cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Queries sent to the backend
    pub issued: usize,
    /// Issued queries the backend answered with an error
    pub failed: usize,
    /// Queries never sent because they could not be rendered
    pub rejected: usize,
    /// Scopes skipped because their table (or the binding table) was empty
    pub skipped: Vec<MetricScope>,
}

/// Metrics collector for the poller
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    /// Record a skipped scope
    pub fn record_skipped(&self, scope: MetricScope) {
        debug!(scope = %scope, "Skipping scope with nothing to query");
    }

    /// Record a completed poll cycle
    pub fn record_cycle(&self, report: &CycleReport, elapsed: Duration) {
        info!(
            issued = report.issued,
            failed = report.failed,
            rejected = report.rejected,
            skipped = ?report.skipped,
            elapsed_ms = elapsed.as_millis() as u64,
            "Poll cycle complete"
        );
    }
}
