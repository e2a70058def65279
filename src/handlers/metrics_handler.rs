use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;

use super::ExporterState;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Handle the metrics endpoint: device catalogue, then self-metrics
pub async fn metrics(State(state): State<ExporterState>) -> impl IntoResponse {
    let snapshot = state.store.snapshot().await;
    let directory = state.directory.load();

    let mut body = state.catalogue.render(&snapshot, &directory, Utc::now());
    if let Some(handle) = &state.self_metrics {
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&handle.render());
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposition::{Catalogue, ExpositionSettings};
    use crate::parser::Observation;
    use crate::probe::DeviceDirectory;
    use crate::store::DeviceStore;
    use arc_swap::ArcSwap;
    use std::sync::Arc;

    fn state(store: Arc<DeviceStore>) -> ExporterState {
        // Create a handle for testing without initializing global recorder
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();

        ExporterState {
            store,
            catalogue: Arc::new(Catalogue::new(ExpositionSettings {
                prefix: "prusa".to_string(),
                expose_unknown: false,
                ttl: chrono::Duration::seconds(60),
            })),
            directory: Arc::new(ArcSwap::from_pointee(DeviceDirectory::default())),
            self_metrics: Some(recorder.handle()),
        }
    }

    #[tokio::test]
    async fn test_metrics_handler_empty_store() {
        let response = metrics(State(state(Arc::new(DeviceStore::new())))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_devices() {
        let store = Arc::new(DeviceStore::new());
        store
            .apply(
                "aa:bb:cc:dd:ee:ff",
                "192.168.1.20",
                Utc::now(),
                &[Observation::new("temp_mcu", "value", "42.5")],
            )
            .await;

        let response = metrics(State(state(store))).await.into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let line = text
            .lines()
            .find(|l| l.starts_with("prusa_temp_mcu_celsius{"))
            .unwrap();
        assert!(line.contains("mac=\"aa:bb:cc:dd:ee:ff\""));
        assert!(line.contains("ip=\"192.168.1.20\""));
        assert!(line.ends_with(" 42.5"));
    }
}
