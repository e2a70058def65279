use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use super::ExporterState;

/// Health check endpoint
/// Returns 200 OK while the exporter is running
pub async fn health_check(State(state): State<ExporterState>) -> impl IntoResponse {
    let directory = state.directory.load();

    (StatusCode::OK, Json(json!({
        "status": "healthy",
        "service": "syslog-exporter",
        "version": env!("CARGO_PKG_VERSION"),
        "devices": state.store.len().await,
        "probed_devices": directory.len(),
        "reachable_devices": directory.reachable_count(),
    })))
}
