//! Configuration for the task watcher daemon

use clap::Parser;
use std::time::Duration;

/// Address the binding endpoint listens on. Not configurable.
pub const LISTEN_ADDR: &str = "0.0.0.0:18080";

/// Configuration for task watcher
#[derive(Debug, Clone, Parser)]
#[command(name = "task-watcher")]
#[command(about = "Polls Prometheus for a workload's metrics and logs the results")]
pub struct Config {
    /// Prometheus server address (host:port, scheme optional)
    #[arg(long = "addr", env = "PROM_ADDR", default_value = "localhost:9090")]
    pub prom_addr: String,

    /// Workload name; instances are matched by this name prefix
    #[arg(long = "task", env = "TASK_NAME", default_value = "tfrun")]
    pub task_name: String,

    /// Monitor polling interval in seconds
    #[arg(
        long = "poll",
        env = "POLL_INTERVAL",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_secs: u64,

    /// Prometheus query timeout in seconds
    #[arg(long, env, default_value_t = 10)]
    pub query_timeout_secs: u64,

    /// Output logs in JSON format
    #[arg(long, env)]
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prom_addr: "localhost:9090".to_string(),
            task_name: "tfrun".to_string(),
            poll_interval_secs: 1,
            query_timeout_secs: 10,
            log_json: false,
        }
    }
}

impl Config {
    /// Parse configuration from command-line args and environment variables
    pub fn parse_config() -> Self {
        Config::parse()
    }

    /// Base URL of the Prometheus HTTP API
    pub fn prometheus_url(&self) -> String {
        let addr = self.prom_addr.trim_end_matches('/');
        if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}
