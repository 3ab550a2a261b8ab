//! Result sink - where every query outcome ends up

use tracing::{info, warn};

/// Outcome of one query in a poll cycle
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    /// Metric label the query was rendered from
    pub label: String,
    /// Workload instance the device is bound to (accelerator queries only)
    pub instance: Option<String>,
    /// Rendered query; empty when rendering itself failed
    pub query: String,
    /// Formatted result, or the error message
    pub outcome: Result<String, String>,
}

impl QueryRecord {
    /// The label, extended with the bound instance for accelerator queries
    pub fn tag(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{} in {}", self.label, instance),
            None => self.label.clone(),
        }
    }

    /// `"<tag>\n<value>"` on success, `"<tag>\nError <error>"` on failure
    pub fn line(&self) -> String {
        match &self.outcome {
            Ok(value) => format!("{}\n{}", self.tag(), value),
            Err(error) => format!("{}\nError {}", self.tag(), error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Receives every query outcome. Must not block for long: the poller calls it
/// inline between queries.
pub trait Sink: Send + Sync {
    fn emit(&self, record: &QueryRecord);
}

/// Writes each record as one structured log event
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn emit(&self, record: &QueryRecord) {
        let instance = record.instance.as_deref().unwrap_or("");
        if record.is_ok() {
            info!(
                label = %record.label,
                instance = %instance,
                query = %record.query,
                "{}",
                record.line()
            );
        } else {
            warn!(
                label = %record.label,
                instance = %instance,
                query = %record.query,
                "{}",
                record.line()
            );
        }
    }
}
