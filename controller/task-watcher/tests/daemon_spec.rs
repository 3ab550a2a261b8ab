//! Daemon startup against the fixed listen address

use std::sync::Arc;
use std::time::Duration;
use task_watcher::{config::LISTEN_ADDR, Config, LogSink, PrometheusBackend, TaskWatcher};
use tokio::net::TcpListener;

#[tokio::test]
async fn test_run_fails_when_listen_address_taken() {
    // Given: something else already holds the listen port. If this bind
    // fails the port is taken by another process, which is just as good.
    let _holder = TcpListener::bind(LISTEN_ADDR).await.ok();

    let config = Config::default();
    let backend =
        PrometheusBackend::new(&config.prometheus_url(), config.query_timeout()).unwrap();
    let watcher = TaskWatcher::new(&config, Arc::new(backend), Arc::new(LogSink));

    // When
    let result = tokio::time::timeout(Duration::from_secs(5), watcher.run())
        .await
        .expect("run should return instead of waiting for a shutdown signal");

    // Then: the bind error is returned, not logged and swallowed
    let err = result.expect_err("bind failure must be fatal");
    let message = format!("{:#}", err);
    assert!(
        message.contains(&format!("Failed to bind {}", LISTEN_ADDR)),
        "unexpected error: {}",
        message
    );
}
