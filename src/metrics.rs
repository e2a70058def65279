use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global recorder for the exporter's own metrics
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(
        "syslog_datagrams_received_total",
        "Total number of syslog datagrams received"
    );
    describe_counter!(
        "syslog_decode_errors_total",
        "Total number of datagrams dropped because the envelope could not be decoded"
    );
    describe_counter!(
        "syslog_messages_dropped_total",
        "Total number of decoded messages dropped before ingestion"
    );
    describe_counter!(
        "syslog_observations_total",
        "Total number of observations written to the device store"
    );
    describe_gauge!("syslog_devices", "Number of devices currently held in the store");
    describe_counter!(
        "syslog_devices_evicted_total",
        "Total number of devices removed after exceeding the TTL"
    );
    describe_counter!(
        "syslog_forward_failures_total",
        "Total number of line-protocol writes that failed"
    );
    describe_gauge!("syslog_exporter_info", "Exporter version information");

    gauge!("syslog_exporter_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

pub fn record_datagram() {
    counter!("syslog_datagrams_received_total").increment(1);
}

pub fn record_decode_error() {
    counter!("syslog_decode_errors_total").increment(1);
}

/// Record a dropped message; `reason` is `missing_identity` or `queue_full`
pub fn record_dropped(reason: &'static str) {
    counter!("syslog_messages_dropped_total", "reason" => reason).increment(1);
}

pub fn record_observations(count: usize) {
    counter!("syslog_observations_total").increment(count as u64);
}

pub fn record_evictions(count: usize) {
    counter!("syslog_devices_evicted_total").increment(count as u64);
}

pub fn update_device_count(count: usize) {
    gauge!("syslog_devices").set(count as f64);
}

/// Record a forwarding failure; `reason` is `queue_full` or an error kind
/// such as `forward_error` or `http_request_error`
pub fn record_forward_failure(reason: &'static str) {
    counter!("syslog_forward_failures_total", "reason" => reason).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics() {
        init_metric_descriptions();

        // No global recorder in tests; calls must be harmless no-ops
        record_datagram();
        record_decode_error();
        record_dropped("queue_full");
        record_observations(3);
        record_evictions(1);
        update_device_count(2);
        record_forward_failure("http_request_error");
    }

    #[test]
    fn test_descriptions_with_local_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            init_metric_descriptions();
            record_dropped("queue_full");
        });

        let rendered = handle.render();
        assert!(rendered.contains("syslog_messages_dropped_total{reason=\"queue_full\"} 1"));
        assert!(rendered.contains("syslog_exporter_info"));
    }
}
