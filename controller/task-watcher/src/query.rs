//! PromQL rendering for registered metrics
//!
//! Every value interpolated into a query is checked or escaped first: series
//! names must be valid Prometheus metric names, the workload name is escaped
//! for the regex matcher it sits in, and device ids are escaped as string
//! literals.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Window the workload rate is computed over
pub const RATE_WINDOW: &str = "1m";

/// Label carrying the workload instance name on container series
pub const INSTANCE_LABEL: &str = "pod_name";

/// Label carrying the device identifier on accelerator series
pub const DEVICE_LABEL: &str = "device_uuid";

static METRIC_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("metric name pattern is valid"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid series name: {series:?}")]
    InvalidSeriesName { series: String },

    #[error("Empty value for matcher on label {label}")]
    EmptyMatcherValue { label: &'static str },
}

/// Renders backend queries for one watched workload
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    workload: String,
}

impl QueryPlanner {
    pub fn new(workload: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
        }
    }

    pub fn workload(&self) -> &str {
        &self.workload
    }

    /// Per-instance rate of `series` for every instance named after the workload
    pub fn workload_query(&self, series: &str) -> Result<String, QueryError> {
        check_series(series)?;
        if self.workload.is_empty() {
            return Err(QueryError::EmptyMatcherValue {
                label: INSTANCE_LABEL,
            });
        }
        let prefix = escape_string(&regex::escape(&self.workload));
        Ok(format!(
            "sum(rate({series}{{{INSTANCE_LABEL}=~\"^{prefix}.*\"}}[{RATE_WINDOW}])) by ({INSTANCE_LABEL})"
        ))
    }

    /// Unfiltered instant query for a node-wide series
    pub fn node_query(&self, series: &str) -> Result<String, QueryError> {
        check_series(series)?;
        Ok(format!("{series}{{}}"))
    }

    /// Instant query for `series` restricted to exactly one device
    pub fn accelerator_query(&self, series: &str, device_id: &str) -> Result<String, QueryError> {
        check_series(series)?;
        if device_id.is_empty() {
            return Err(QueryError::EmptyMatcherValue {
                label: DEVICE_LABEL,
            });
        }
        Ok(format!(
            "{series}{{{DEVICE_LABEL}=\"{}\"}}",
            escape_string(device_id)
        ))
    }
}

fn check_series(series: &str) -> Result<(), QueryError> {
    if METRIC_NAME.is_match(series) {
        Ok(())
    } else {
        Err(QueryError::InvalidSeriesName {
            series: series.to_string(),
        })
    }
}

/// Escape a value for use inside a double-quoted PromQL string
fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }
    escaped
}
