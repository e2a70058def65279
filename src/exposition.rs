//! Exposition of the device store in the Prometheus text format
//!
//! Known metric names map 1:1 to fixed exported gauges declared once in
//! [`KNOWN_METRICS`]. Each scrape renders a snapshot through a fresh
//! `metrics-exporter-prometheus` recorder, so a device without a value for a
//! metric simply has no sample on that scrape.

use chrono::{DateTime, Utc};
use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::{BTreeMap, HashMap};

use crate::parser::{IP_METRIC, TIMESTAMP_METRIC};
use crate::probe::DeviceDirectory;
use crate::store::{DeviceEntry, Snapshot, StoredValue};

/// One exported series: which stored field feeds which gauge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportedMetric {
    /// Metric name as reported by the device, before index suffixing
    pub source: &'static str,
    /// Stored field holding the sample value
    pub field: &'static str,
    /// Exported name, without the configured prefix
    pub name: &'static str,
    pub help: &'static str,
    /// Index role whose value becomes a label of the same name
    pub index: Option<&'static str>,
}

const fn known(source: &'static str, field: &'static str, name: &'static str, help: &'static str) -> ExportedMetric {
    ExportedMetric {
        source,
        field,
        name,
        help,
        index: None,
    }
}

const fn indexed(
    source: &'static str,
    field: &'static str,
    name: &'static str,
    help: &'static str,
    index: &'static str,
) -> ExportedMetric {
    ExportedMetric {
        source,
        field,
        name,
        help,
        index: Some(index),
    }
}

pub const KNOWN_METRICS: &[ExportedMetric] = &[
    known("temp_noz", "value", "temp_nozzle_celsius", "Nozzle temperature"),
    known("ttemp_noz", "value", "target_temp_nozzle_celsius", "Nozzle target temperature"),
    known("temp_bed", "value", "temp_bed_celsius", "Bed temperature"),
    known("ttemp_bed", "value", "target_temp_bed_celsius", "Bed target temperature"),
    known("temp_mcu", "value", "temp_mcu_celsius", "MCU temperature"),
    known("temp_brd", "value", "temp_board_celsius", "Board temperature"),
    known("temp_hbr", "value", "temp_heatbreak_celsius", "Heatbreak temperature"),
    known("temp_ambient", "value", "temp_ambient_celsius", "Ambient temperature"),
    known("volt_bed", "value", "bed_voltage_volts", "Bed heater voltage"),
    known("volt_nozz", "value", "nozzle_voltage_volts", "Nozzle heater voltage"),
    known("curr_inp", "value", "input_current_amperes", "Input current"),
    known("curr_nozz", "value", "nozzle_current_amperes", "Nozzle heater current"),
    known("cpu_usage", "value", "cpu_usage_percent", "CPU usage"),
    known("loadcell_value", "value", "loadcell_value", "Load cell reading"),
    known("heap", "free", "heap_free_bytes", "Free heap memory"),
    known("heap", "total", "heap_total_bytes", "Total heap memory"),
    known("pos", "x", "position_x_mm", "Position on the X axis"),
    known("pos", "y", "position_y_mm", "Position on the Y axis"),
    known("pos", "z", "position_z_mm", "Position on the Z axis"),
    indexed("fan", "state", "fan_state", "Fan state", "fan"),
    indexed("fan", "pwm", "fan_pwm", "Fan PWM duty", "fan"),
    indexed("fan", "measured", "fan_speed_rpm", "Measured fan speed", "fan"),
    indexed("heater", "value", "heater_pwm", "Heater PWM duty", "n"),
];

/// Exposition settings
#[derive(Debug, Clone)]
pub struct ExpositionSettings {
    /// Prepended to every exported name as `<prefix>_`
    pub prefix: String,
    /// Pass unknown metrics through as `<prefix>_<metric>_<field>`
    pub expose_unknown: bool,
    /// Devices older than this are skipped on scrape
    pub ttl: chrono::Duration,
}

/// Fixed descriptor set plus rendering, built once at startup
#[derive(Debug)]
pub struct Catalogue {
    settings: ExpositionSettings,
    by_source: HashMap<&'static str, Vec<&'static ExportedMetric>>,
    /// Full exported name -> help, for every known series
    descriptors: BTreeMap<String, &'static str>,
}

impl Catalogue {
    pub fn new(settings: ExpositionSettings) -> Self {
        Self::with_metrics(settings, KNOWN_METRICS)
    }

    pub fn with_metrics(settings: ExpositionSettings, metrics: &'static [ExportedMetric]) -> Self {
        let mut by_source: HashMap<&'static str, Vec<&'static ExportedMetric>> = HashMap::new();
        let mut descriptors = BTreeMap::new();

        for metric in metrics {
            by_source.entry(metric.source).or_default().push(metric);
            descriptors.insert(format!("{}_{}", settings.prefix, metric.name), metric.help);
        }
        descriptors.insert(
            last_seen_name(&settings.prefix),
            "Unix time of the last message received from the device",
        );

        Self {
            settings,
            by_source,
            descriptors,
        }
    }

    pub fn descriptors(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.descriptors.iter().map(|(name, help)| (name.as_str(), *help))
    }

    /// Render a snapshot. Never fails: an empty snapshot renders as an empty
    /// catalogue.
    pub fn render(&self, snapshot: &Snapshot, directory: &DeviceDirectory, now: DateTime<Utc>) -> String {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            for (name, help) in &self.descriptors {
                metrics::describe_gauge!(name.clone(), *help);
            }

            for (device, entry) in snapshot {
                if !entry.is_live(self.settings.ttl, now) {
                    continue;
                }
                self.record_device(device, entry, directory);
            }
        });

        handle.render()
    }

    fn record_device(&self, device: &str, entry: &DeviceEntry, directory: &DeviceDirectory) {
        let labels = device_labels(device, entry, directory);

        metrics::gauge!(last_seen_name(&self.settings.prefix), labels.clone())
            .set(entry.last_seen.timestamp_millis() as f64 / 1000.0);

        for (metric, fields) in &entry.metrics {
            if metric == IP_METRIC || metric == TIMESTAMP_METRIC {
                continue;
            }

            match self.resolve(metric, fields) {
                Some((exports, index)) => {
                    for export in exports {
                        let Some(sample) = fields.get(export.field).and_then(StoredValue::sample) else {
                            continue;
                        };
                        let mut series_labels = labels.clone();
                        if let (Some(key), Some(value)) = (export.index, index) {
                            series_labels.push(Label::new(key, value.to_string()));
                        }
                        let name = format!("{}_{}", self.settings.prefix, export.name);
                        metrics::gauge!(name, series_labels).set(sample);
                    }
                }
                None if self.settings.expose_unknown => {
                    // Text and index fields never become samples
                    for (field, value) in fields {
                        let Some(sample) = value.sample() else {
                            continue;
                        };
                        let name = format!("{}_{}_{}", self.settings.prefix, metric, field);
                        metrics::gauge!(name, labels.clone()).set(sample);
                    }
                }
                None => {}
            }
        }
    }

    /// Known exports for a stored metric name, plus the index value when the
    /// name carries an index suffix
    fn resolve<'a>(
        &self,
        metric: &'a str,
        fields: &BTreeMap<String, StoredValue>,
    ) -> Option<(&[&'static ExportedMetric], Option<&'a str>)> {
        if let Some(exports) = self.by_source.get(metric) {
            if exports.iter().all(|e| e.index.is_none()) {
                return Some((exports.as_slice(), None));
            }
        }

        let (base, index) = metric.rsplit_once('_')?;
        let exports = self.by_source.get(base)?;
        let key = exports.iter().find_map(|e| e.index)?;
        if fields.get(key).map(|v| v.value.as_str()) == Some(index) {
            Some((exports.as_slice(), Some(index)))
        } else {
            None
        }
    }
}

fn last_seen_name(prefix: &str) -> String {
    format!("{}_last_seen_timestamp_seconds", prefix)
}

fn device_labels(device: &str, entry: &DeviceEntry, directory: &DeviceDirectory) -> Vec<Label> {
    let mut labels = vec![
        Label::new("mac", device.to_string()),
        Label::new("ip", entry.address.clone()),
    ];
    if let Some(info) = directory.get(&entry.address) {
        labels.push(Label::new("name", info.name.clone()));
        labels.push(Label::new("model", info.model.clone()));
    }
    labels
}
