//! Stale-entry reaper
//!
//! Periodically removes devices that have not reported within the TTL.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::metrics;
use crate::signals::ShutdownSignal;
use crate::store::DeviceStore;

/// Reaper configuration
#[derive(Debug, Clone, Copy)]
pub struct ReaperConfig {
    /// Devices silent for longer than this are removed
    pub ttl: Duration,

    /// How often to run eviction
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            interval: Duration::from_secs(10),
        }
    }
}

/// Spawn the background reaper task
///
/// The task stops when a shutdown signal is broadcast.
pub fn spawn_reaper_task(
    store: Arc<DeviceStore>,
    config: ReaperConfig,
    shutdown: broadcast::Receiver<ShutdownSignal>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        reaper_loop(store, config, shutdown).await;
    })
}

async fn reaper_loop(
    store: Arc<DeviceStore>,
    config: ReaperConfig,
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
) {
    let mut interval = time::interval(config.interval);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Reaper stopping");
                break;
            }
            _ = interval.tick() => {
                run_eviction_now(&store, config.ttl).await;
            }
        }
    }
}

/// Run one eviction pass immediately
pub async fn run_eviction_now(store: &DeviceStore, ttl: Duration) -> usize {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    let removed = store.evict(ttl, Utc::now()).await;
    let remaining = store.len().await;

    metrics::record_evictions(removed);
    metrics::update_device_count(remaining);

    if removed > 0 {
        tracing::info!(removed, remaining, "Evicted stale devices");
    } else {
        tracing::debug!(remaining, "Eviction pass completed");
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_eviction_now() {
        let store = DeviceStore::new();
        let now = Utc::now();
        store.apply("old", "10.0.0.1", now - chrono::Duration::seconds(120), &[]).await;
        store.apply("recent", "10.0.0.2", now, &[]).await;

        let removed = run_eviction_now(&store, Duration::from_secs(60)).await;
        assert_eq!(removed, 1);

        let snapshot = store.snapshot().await;
        assert!(snapshot.contains_key("recent"));
        assert!(!snapshot.contains_key("old"));
    }

    #[tokio::test]
    async fn test_reaper_stops_on_shutdown() {
        let store = Arc::new(DeviceStore::new());
        let (tx, rx) = broadcast::channel(1);
        let config = ReaperConfig {
            ttl: Duration::from_secs(1),
            interval: Duration::from_millis(10),
        };

        let handle = spawn_reaper_task(store, config, rx);
        tx.send(ShutdownSignal::Graceful).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_reaper_evicts_in_background() {
        let store = Arc::new(DeviceStore::new());
        store
            .apply("old", "10.0.0.1", Utc::now() - chrono::Duration::seconds(10), &[])
            .await;

        let (tx, rx) = broadcast::channel(1);
        let config = ReaperConfig {
            ttl: Duration::from_secs(1),
            interval: Duration::from_millis(10),
        };
        let handle = spawn_reaper_task(store.clone(), config, rx);

        for _ in 0..100 {
            if store.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.is_empty().await);

        tx.send(ShutdownSignal::Graceful).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_reaper_config_default() {
        let config = ReaperConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.interval, Duration::from_secs(10));
    }
}
