//! Ingest task: the single writer path from the listener queue into the store

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::forward::ForwardHandle;
use crate::metrics;
use crate::parser;
use crate::patterns::PatternLibrary;
use crate::store::DeviceStore;
use crate::syslog::SyslogMessage;

/// Everything the ingest task needs, shared with nothing that writes
#[derive(Clone)]
pub struct Pipeline {
    pub library: Arc<PatternLibrary>,
    pub store: Arc<DeviceStore>,
    pub forwarder: Option<ForwardHandle>,
}

impl Pipeline {
    pub fn new(library: Arc<PatternLibrary>, store: Arc<DeviceStore>) -> Self {
        Self {
            library,
            store,
            forwarder: None,
        }
    }

    pub fn with_forwarder(mut self, forwarder: ForwardHandle) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Parse one message and apply it to the store. Returns the number of
    /// observations written.
    pub async fn process(&self, message: &SyslogMessage, received_at: DateTime<Utc>) -> usize {
        let observations = parser::parse_message(&self.library, message, received_at);

        self.store
            .apply(
                &message.device,
                &message.client.ip().to_string(),
                received_at,
                &observations,
            )
            .await;

        tracing::trace!(
            device = %message.device,
            observations = observations.len(),
            "Message applied"
        );
        metrics::record_observations(observations.len());

        // Secondary sink, never allowed to affect the cache path
        if let Some(forwarder) = &self.forwarder {
            forwarder.submit(message, received_at);
        }

        observations.len()
    }
}

/// Spawn the ingest task. It runs until the queue is closed (the listener
/// dropped its sender) and every queued message has been processed.
pub fn spawn_ingest_task(
    pipeline: Pipeline,
    rx: mpsc::Receiver<SyslogMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        ingest_loop(pipeline, rx).await;
    })
}

async fn ingest_loop(pipeline: Pipeline, mut rx: mpsc::Receiver<SyslogMessage>) {
    let mut processed: u64 = 0;

    while let Some(message) = rx.recv().await {
        pipeline.process(&message, Utc::now()).await;
        processed += 1;
    }

    tracing::info!(messages = processed, "Ingest queue drained, ingest task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syslog;

    fn message(payload: &str) -> SyslogMessage {
        let datagram = format!("<13>1 - aa:bb:cc:dd:ee:ff app - - - {}", payload);
        syslog::decode(datagram.as_bytes())
            .unwrap()
            .normalize("192.168.1.30:514".parse().unwrap(), None)
            .unwrap()
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Arc::new(PatternLibrary::compile().unwrap()),
            Arc::new(DeviceStore::new()),
        )
    }

    #[tokio::test]
    async fn test_process_writes_store() {
        let pipeline = pipeline();
        let written = pipeline.process(&message("temp_mcu v=42.5"), Utc::now()).await;
        assert_eq!(written, 3);

        let snapshot = pipeline.store.snapshot().await;
        let entry = &snapshot["aa:bb:cc:dd:ee:ff"];
        assert_eq!(entry.address, "192.168.1.30");
        assert_eq!(entry.field("ip", "value"), Some("192.168.1.30"));
        assert!(entry.field("timestamp", "value").is_some());
        assert_eq!(entry.field("temp_mcu", "value"), Some("42.5"));
    }

    #[tokio::test]
    async fn test_unmatched_payload_still_records_device() {
        let pipeline = pipeline();
        pipeline.process(&message("boot complete"), Utc::now()).await;

        let snapshot = pipeline.store.snapshot().await;
        let entry = &snapshot["aa:bb:cc:dd:ee:ff"];
        assert_eq!(entry.metrics.len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_task_drains_queue_on_close() {
        let pipeline = pipeline();
        let store = pipeline.store.clone();
        let (tx, rx) = mpsc::channel(8);

        tx.send(message("temp_bed v=60")).await.unwrap();
        tx.send(message("temp_noz v=215")).await.unwrap();
        drop(tx);

        spawn_ingest_task(pipeline, rx).await.unwrap();

        let snapshot = store.snapshot().await;
        let entry = &snapshot["aa:bb:cc:dd:ee:ff"];
        assert_eq!(entry.field("temp_bed", "value"), Some("60"));
        assert_eq!(entry.field("temp_noz", "value"), Some("215"));
    }

    #[tokio::test]
    async fn test_unreachable_forward_sink_does_not_block_store() {
        use crate::forward::{spawn_forwarder, ForwardSettings};
        use std::time::Duration;

        // Nothing listens on port 1; a single-slot queue overflows immediately
        let (handle, forward_task) = spawn_forwarder(
            reqwest::Client::new(),
            ForwardSettings {
                url: "http://127.0.0.1:1/write".to_string(),
                timeout: Duration::from_millis(200),
                queue_capacity: 1,
                prefix: "prusa".to_string(),
            },
        );
        let pipeline = pipeline().with_forwarder(handle);
        let store = pipeline.store.clone();

        for i in 0..20 {
            pipeline
                .process(&message(&format!("temp_bed v={}", i)), Utc::now())
                .await;
        }

        let snapshot = store.snapshot().await;
        let entry = &snapshot["aa:bb:cc:dd:ee:ff"];
        assert_eq!(entry.field("temp_bed", "value"), Some("19"));

        // Dropping the last handle closes the queue; the task drains and exits
        drop(pipeline);
        tokio::time::timeout(Duration::from_secs(10), forward_task)
            .await
            .unwrap()
            .unwrap();
    }
}
