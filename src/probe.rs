//! Device probing and label enrichment
//!
//! Configured devices are probed over HTTP for reachability and model. The
//! result is a [`DeviceDirectory`] keyed by device address that the
//! exposition step reads for extra labels. The exporter works without it:
//! devices missing from the directory are exported with fewer labels.

use arc_swap::ArcSwap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::error::{error_kind, ExporterError};
use crate::signals::ShutdownSignal;
use crate::syslog::UNKNOWN;

/// Labels known for one device address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub model: String,
    pub reachable: bool,
}

/// Probe results keyed by device address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDirectory {
    devices: HashMap<String, DeviceInfo>,
}

impl DeviceDirectory {
    pub fn get(&self, address: &str) -> Option<&DeviceInfo> {
        self.devices.get(address)
    }

    pub fn insert(&mut self, address: impl Into<String>, info: DeviceInfo) {
        self.devices.insert(address.into(), info);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn reachable_count(&self) -> usize {
        self.devices.values().filter(|d| d.reachable).count()
    }
}

/// Shared, atomically replaceable directory
pub type SharedDirectory = Arc<ArcSwap<DeviceDirectory>>;

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    original: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
}

/// HTTP client for the device API
#[derive(Clone)]
pub struct DeviceProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl DeviceProber {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Probe one device. `Ok(None)` means reachable but no model reported.
    pub async fn probe(&self, device: &DeviceConfig) -> Result<Option<String>, ExporterError> {
        let url = format!("{}/api/version", base_url(&device.address));
        let mut request = self.client.get(&url).timeout(self.timeout);
        if let Some(api_key) = &device.api_key {
            request = request.header("X-Api-Key", api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExporterError::Probe {
                address: device.address.clone(),
                message: format!("status {}", status),
            });
        }

        // Reachable even if the body is not what we expect
        let model = match response.json::<VersionResponse>().await {
            Ok(body) => body.original.or(body.hostname),
            Err(e) => {
                debug!(address = %device.address, error = %e, "Unexpected version response body");
                None
            }
        };

        Ok(model)
    }

    /// Probe every configured device and build a directory
    pub async fn build_directory(&self, devices: &[DeviceConfig]) -> DeviceDirectory {
        let mut directory = DeviceDirectory::default();

        for device in devices {
            let (reachable, probed_model) = match self.probe(device).await {
                Ok(model) => (true, model),
                Err(e) => {
                    warn!(
                        address = %device.address,
                        kind = error_kind(&e),
                        error = %e,
                        "Device is not reachable"
                    );
                    (false, None)
                }
            };

            let model = device
                .model
                .clone()
                .or(probed_model)
                .unwrap_or_else(|| UNKNOWN.to_string());
            let name = device.name.clone().unwrap_or_else(|| device.address.clone());

            directory.insert(
                host_of(&device.address),
                DeviceInfo {
                    name,
                    model,
                    reachable,
                },
            );
        }

        directory
    }
}

/// `http://` is assumed when the address has no scheme
fn base_url(address: &str) -> String {
    let trimmed = address.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Host part of a configured address, as it appears as the syslog sender
pub fn host_of(address: &str) -> String {
    let without_scheme = address
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);

    match host_port.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            host.to_string()
        }
        _ => host_port.trim_start_matches('[').trim_end_matches(']').to_string(),
    }
}

/// Everything needed to rebuild the directory on demand
pub struct DirectoryRefresher {
    prober: DeviceProber,
    devices: Vec<DeviceConfig>,
    directory: SharedDirectory,
}

impl DirectoryRefresher {
    pub fn new(prober: DeviceProber, devices: Vec<DeviceConfig>, directory: SharedDirectory) -> Self {
        Self {
            prober,
            devices,
            directory,
        }
    }

    /// Probe all devices and swap the shared directory
    pub async fn refresh(&self) {
        let fresh = self.prober.build_directory(&self.devices).await;
        info!(
            devices = fresh.len(),
            reachable = fresh.reachable_count(),
            "Device directory refreshed"
        );
        self.directory.store(Arc::new(fresh));
    }

    pub fn directory(&self) -> &SharedDirectory {
        &self.directory
    }
}

/// Re-probe on a fixed interval until shutdown
pub fn spawn_probe_task(
    refresher: Arc<DirectoryRefresher>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; the directory was built at startup
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Probe task stopping");
                    break;
                }
                _ = ticker.tick() => {
                    refresher.refresh().await;
                }
            }
        }
    })
}
