//! HTTP surface: liveness index and accelerator binding registration

use crate::registry::{BindingTable, MetricRegistry};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Body returned by the index route
pub const INDEX_BODY: &str = "Task Watcher";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<MetricRegistry>,
}

/// GET / - identification string, doubles as a liveness check
async fn index() -> &'static str {
    INDEX_BODY
}

/// POST /api/metrics/gpu/:device_id/:workload_id - bind a device to a workload instance
///
/// Any pair of path segments is accepted; the ids are escaped when they are
/// rendered into queries, not validated here.
async fn add_gpu_binding(
    State(state): State<AppState>,
    Path((device_id, workload_id)): Path<(String, String)>,
) -> &'static str {
    info!(
        device_id = %device_id,
        workload_id = %workload_id,
        "Binding GPU to workload instance"
    );
    state.registry.set_binding(device_id, workload_id);
    "OK"
}

/// GET /api/metrics/gpu - current device bindings
async fn list_gpu_bindings(State(state): State<AppState>) -> Json<BindingTable> {
    let bindings = state.registry.bindings();
    debug!("Listing {} GPU bindings", bindings.len());
    Json(bindings)
}

/// Create the Axum application router
pub fn create_app(registry: Arc<MetricRegistry>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/metrics/gpu", get(list_gpu_bindings))
        .route(
            "/api/metrics/gpu/:device_id/:workload_id",
            post(add_gpu_binding),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { registry })
}
