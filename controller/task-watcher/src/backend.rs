//! Telemetry backend trait and the Prometheus HTTP implementation
//!
//! The poller only needs "evaluate this expression at this instant"; the
//! result is opaque to it and forwarded verbatim to the sink, so
//! [`QueryValue`] mainly exists to render a readable log line.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Prometheus returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Prometheus query failed ({error_type}): {message}")]
    Api { error_type: String, message: String },

    #[error("Failed to decode Prometheus response: {0}")]
    Decode(String),
}

/// Telemetry backend - implement this to query a different time-series store
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    /// Evaluate `expression` at instant `at`
    async fn query(&self, expression: &str, at: DateTime<Utc>) -> Result<QueryValue, BackendError>;
}

/// `[<unix seconds>, "<value>"]` as returned by the query API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePair(pub f64, pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    pub value: SamplePair,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStream {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    pub values: Vec<SamplePair>,
}

/// Result of an instant query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryValue {
    Vector(Vec<Sample>),
    Matrix(Vec<SampleStream>),
    Scalar(SamplePair),
    String(SamplePair),
}

/// Double-quote `value` the way Prometheus clients print label values:
/// printable characters (including non-ASCII) stay as-is, control
/// characters become C-style or hex escapes
fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in value.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            '\u{07}' => f.write_str("\\a")?,
            '\u{08}' => f.write_str("\\b")?,
            '\u{0b}' => f.write_str("\\v")?,
            '\u{0c}' => f.write_str("\\f")?,
            c if c.is_control() => match c as u32 {
                code @ 0..=0x7f => write!(f, "\\x{:02x}", code)?,
                code @ 0x80..=0xffff => write!(f, "\\u{:04x}", code)?,
                code => write!(f, "\\U{:08x}", code)?,
            },
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

fn fmt_labels(f: &mut fmt::Formatter<'_>, labels: &BTreeMap<String, String>) -> fmt::Result {
    if let Some(name) = labels.get("__name__") {
        write!(f, "{}", name)?;
    }
    write!(f, "{{")?;
    let mut first = true;
    for (key, value) in labels.iter().filter(|(key, _)| key.as_str() != "__name__") {
        if !first {
            write!(f, ", ")?;
        }
        first = false;
        write!(f, "{}=", key)?;
        write_quoted(f, value)?;
    }
    write!(f, "}}")
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Vector(samples) => {
                for (i, sample) in samples.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    fmt_labels(f, &sample.metric)?;
                    write!(f, " => {} @[{}]", sample.value.1, sample.value.0)?;
                }
                Ok(())
            }
            QueryValue::Matrix(streams) => {
                for (i, stream) in streams.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    fmt_labels(f, &stream.metric)?;
                    write!(f, " =>")?;
                    for pair in &stream.values {
                        write!(f, "\n{} @[{}]", pair.1, pair.0)?;
                    }
                }
                Ok(())
            }
            QueryValue::Scalar(pair) => write!(f, "scalar: {} @[{}]", pair.1, pair.0),
            QueryValue::String(pair) => write!(f, "{}", pair.1),
        }
    }
}

/// Envelope shared by every Prometheus HTTP API response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    data: Option<QueryValue>,
    error_type: Option<String>,
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// Prometheus HTTP API client - GETs `/api/v1/query`
pub struct PrometheusBackend {
    endpoint: String,
    client: reqwest::Client,
}

impl PrometheusBackend {
    /// Create a new client for the Prometheus server at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            endpoint: format!("{}/api/v1/query", base_url.trim_end_matches('/')),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TelemetryBackend for PrometheusBackend {
    async fn query(&self, expression: &str, at: DateTime<Utc>) -> Result<QueryValue, BackendError> {
        let time = format!("{:.3}", at.timestamp_millis() as f64 / 1000.0);
        debug!(query = %expression, time = %time, "Querying Prometheus");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("query", expression), ("time", time.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        let parsed: ApiResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => return Err(BackendError::Decode(e.to_string())),
            Err(_) => return Err(BackendError::Status { status, body }),
        };

        if parsed.status != "success" {
            return Err(BackendError::Api {
                error_type: parsed.error_type.unwrap_or_else(|| "unknown".to_string()),
                message: parsed.error.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(BackendError::Status { status, body });
        }

        for warning in &parsed.warnings {
            warn!(query = %expression, warning = %warning, "Prometheus query warning");
        }

        parsed
            .data
            .ok_or_else(|| BackendError::Decode("missing data in successful response".to_string()))
    }
}
