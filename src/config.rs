use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::ExporterError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub syslog: SyslogConfig,
    #[serde(default)]
    pub exposition: ExpositionConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            metrics_path: default_metrics_path(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyslogConfig {
    /// UDP bind address for RFC 5424 datagrams
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Devices silent for longer than this are evicted
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_reap_interval_seconds")]
    pub reap_interval_seconds: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            ttl_seconds: default_ttl_seconds(),
            reap_interval_seconds: default_reap_interval_seconds(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl SyslogConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpositionConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Export metrics missing from the catalogue as `<prefix>_<metric>_<field>`
    #[serde(default)]
    pub expose_unknown: bool,
}

impl Default for ExpositionConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            expose_unknown: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout_seconds")]
    pub timeout_seconds: u64,
    /// 0 disables periodic re-probing
    #[serde(default = "default_probe_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_probe_timeout_seconds(),
            interval_seconds: default_probe_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_forward_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            prefix: default_prefix(),
            timeout_seconds: default_forward_timeout_seconds(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// A device to probe for labels
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Host, `host:port` or URL of the device HTTP API
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10009
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:514".to_string()
}

fn default_ttl_seconds() -> u64 {
    60
}

fn default_reap_interval_seconds() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_prefix() -> String {
    "prusa".to_string()
}

fn default_probe_timeout_seconds() -> u64 {
    5
}

fn default_probe_interval_seconds() -> u64 {
    300
}

fn default_forward_timeout_seconds() -> u64 {
    5
}

pub fn load_config(path: &Path) -> Result<Config, ExporterError> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("SYSLOG_EXPORTER").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

macro_rules! bail {
    ($($arg:tt)*) => {
        return Err(ExporterError::Config(format!($($arg)*)))
    };
}

/// Reject configurations the exporter cannot run with
pub fn validate_config(cfg: &Config) -> Result<(), ExporterError> {
    if cfg.syslog.listen_address.trim().is_empty() {
        bail!("syslog.listen_address cannot be empty");
    }

    if cfg.syslog.ttl_seconds == 0 {
        bail!("syslog.ttl_seconds must be greater than 0");
    }

    if cfg.syslog.reap_interval_seconds == 0 {
        bail!("syslog.reap_interval_seconds must be greater than 0");
    }

    if cfg.syslog.queue_capacity == 0 {
        bail!("syslog.queue_capacity must be greater than 0");
    }

    if !cfg.server.metrics_path.starts_with('/') {
        bail!("server.metrics_path must start with '/': {}", cfg.server.metrics_path);
    }

    if cfg.server.metrics_path == "/health" {
        bail!("server.metrics_path conflicts with the health endpoint");
    }

    match cfg.server.log_format.as_str() {
        "text" | "json" => {}
        other => bail!("server.log_format must be 'text' or 'json', got '{}'", other),
    }

    if cfg.forward.enabled {
        match cfg.forward.url.as_deref() {
            Some(url) if !url.trim().is_empty() => {}
            _ => bail!("forward.url is required when forwarding is enabled"),
        }
        if cfg.forward.queue_capacity == 0 {
            bail!("forward.queue_capacity must be greater than 0");
        }
    }

    let mut seen = HashSet::new();
    for device in &cfg.devices {
        if device.address.trim().is_empty() {
            bail!("Device address cannot be empty");
        }
        if !seen.insert(device.address.as_str()) {
            bail!("Duplicate device address: {}", device.address);
        }
    }

    Ok(())
}
