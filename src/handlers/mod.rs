pub mod health;
pub mod metrics_handler;

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::exposition::Catalogue;
use crate::probe::SharedDirectory;
use crate::store::DeviceStore;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct ExporterState {
    pub store: Arc<DeviceStore>,
    pub catalogue: Arc<Catalogue>,
    pub directory: SharedDirectory,
    /// Process self-metrics, appended after the device catalogue
    pub self_metrics: Option<PrometheusHandle>,
}
