//! Optional secondary sink: line-protocol writes to a remote ingestion endpoint
//!
//! Every parsed message is converted to line protocol, tagged with its
//! envelope fields, and queued for a background task that POSTs it. The
//! queue is bounded and submission never waits, so a slow or failing
//! endpoint cannot stall ingestion into the store.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{error_kind, ExporterError};
use crate::metrics;
use crate::syslog::SyslogMessage;

/// Forwarder settings
#[derive(Debug, Clone)]
pub struct ForwardSettings {
    pub url: String,
    pub timeout: Duration,
    pub queue_capacity: usize,
    /// Prepended to every measurement as `<prefix>_`
    pub prefix: String,
}

/// Cheap handle used by the ingest path to submit messages
#[derive(Clone)]
pub struct ForwardHandle {
    tx: mpsc::Sender<Vec<String>>,
    prefix: Arc<str>,
}

impl ForwardHandle {
    /// Queue a message for forwarding without waiting
    pub fn submit(&self, message: &SyslogMessage, received_at: DateTime<Utc>) {
        let lines = to_line_protocol(&self.prefix, message, received_at);
        if lines.is_empty() {
            return;
        }

        if let Err(e) = self.tx.try_send(lines) {
            debug!(device = %message.device, error = %e, "Forward queue rejected message");
            metrics::record_forward_failure("queue_full");
        }
    }
}

/// HTTP writer for line-protocol batches
pub struct Forwarder {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub async fn send(&self, lines: &[String]) -> Result<(), ExporterError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(lines.join("\n"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExporterError::Forward(format!("status {}: {}", status, body)));
        }
        Ok(())
    }
}

/// Start the forwarding task. It stops once every [`ForwardHandle`] has been
/// dropped and the queue is empty.
pub fn spawn_forwarder(
    client: reqwest::Client,
    settings: ForwardSettings,
) -> (ForwardHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Vec<String>>(settings.queue_capacity);
    let forwarder = Forwarder::new(client, settings.url.clone(), settings.timeout);

    info!(url = %settings.url, "Line-protocol forwarding enabled");

    let handle = tokio::spawn(async move {
        while let Some(lines) = rx.recv().await {
            if let Err(e) = forwarder.send(&lines).await {
                let kind = error_kind(&e);
                error!(url = %forwarder.url, kind, error = %e, "Failed to forward lines");
                metrics::record_forward_failure(kind);
            }
        }
        info!("Forwarder stopped");
    });

    (
        ForwardHandle {
            tx,
            prefix: Arc::from(settings.prefix.as_str()),
        },
        handle,
    )
}

/// Convert a message payload into line-protocol records.
///
/// Per sub-message: a leading `msg` token is dropped, the measurement is
/// prefixed and tagged with the envelope, and a trailing integer is read as a
/// device-side age in microseconds and turned into an absolute timestamp in
/// nanoseconds. Without one, the arrival time is appended.
pub fn to_line_protocol(prefix: &str, message: &SyslogMessage, received_at: DateTime<Utc>) -> Vec<String> {
    let arrival_ns = received_at.timestamp_nanos_opt().unwrap_or_default();
    let tags = envelope_tags(message);

    message
        .message
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| {
            let (mut measurement, mut rest) = line.split_once(' ')?;
            if measurement == "msg" || measurement.starts_with("msg=") {
                (measurement, rest) = rest.split_once(' ')?;
            }
            if measurement.is_empty() || rest.is_empty() {
                return None;
            }

            let (fields, timestamp) = match rest.rsplit_once(' ') {
                Some((fields, age)) if !fields.is_empty() => match age.parse::<i64>() {
                    Ok(age_us) => (fields, arrival_ns.saturating_sub(age_us.saturating_mul(1000))),
                    Err(_) => (rest, arrival_ns),
                },
                _ => (rest, arrival_ns),
            };

            Some(format!("{}_{},{} {} {}", prefix, measurement, tags, fields, timestamp))
        })
        .collect()
}

fn envelope_tags(message: &SyslogMessage) -> String {
    let tags = [
        ("ip", message.client.ip().to_string()),
        ("facility", message.facility.to_string()),
        ("severity", message.severity.to_string()),
        ("app_name", message.app_name.clone()),
        ("proc_id", message.proc_id.clone()),
        ("msg_id", message.msg_id.clone()),
        ("priority", message.priority.to_string()),
        ("structured_data", message.structured_data.clone()),
        ("version", message.version.to_string()),
        ("tls_peer", message.tls_peer.clone()),
        ("mac", message.device.clone()),
    ];

    tags.iter()
        .map(|(key, value)| format!("{}={}", key, escape_tag(value)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape commas, equals signs and spaces in a tag value
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
