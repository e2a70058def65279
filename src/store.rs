//! Device state store
//!
//! Latest value per `(device, metric, field)`, plus last-seen time per device.
//! A single read/write lock guards the whole map: the ingest task is the only
//! regular writer, scrapes only read, and the reaper deletes.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::parser::{Observation, ValueKind};

/// Latest value of one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: String,
    pub kind: ValueKind,
}

impl StoredValue {
    /// Numeric sample, if this is a finite number reading
    pub fn sample(&self) -> Option<f64> {
        if self.kind != ValueKind::Number {
            return None;
        }
        self.value.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

/// metric -> field -> value
pub type MetricMap = BTreeMap<String, BTreeMap<String, StoredValue>>;

/// State kept for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Last sender address
    pub address: String,
    pub last_seen: DateTime<Utc>,
    pub metrics: MetricMap,
}

impl DeviceEntry {
    fn new(address: &str, at: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            last_seen: at,
            metrics: BTreeMap::new(),
        }
    }

    /// Value of one field, if present
    pub fn field(&self, metric: &str, field: &str) -> Option<&str> {
        self.metrics.get(metric)?.get(field).map(|v| v.value.as_str())
    }

    /// Whether this device should still be exposed at `now`
    pub fn is_live(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_seen) <= ttl
    }

    fn set(&mut self, metric: &str, field: &str, value: &str, kind: ValueKind) {
        self.metrics.entry(metric.to_string()).or_default().insert(
            field.to_string(),
            StoredValue {
                value: value.to_string(),
                kind,
            },
        );
    }
}

/// Point-in-time copy of the store, keyed by device identity
pub type Snapshot = BTreeMap<String, DeviceEntry>;

#[derive(Debug, Default)]
pub struct DeviceStore {
    devices: RwLock<BTreeMap<String, DeviceEntry>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one value, creating the device if needed
    pub async fn upsert(&self, device: &str, metric: &str, field: &str, value: &str, at: DateTime<Utc>) {
        let mut devices = self.devices.write().await;
        let entry = devices
            .entry(device.to_string())
            .or_insert_with(|| DeviceEntry::new("", at));
        entry.last_seen = at;
        entry.set(metric, field, value, ValueKind::Number);
    }

    /// Apply all observations of one message under a single lock
    /// acquisition, in the order given. Readers see the message either not
    /// at all or completely.
    pub async fn apply(&self, device: &str, address: &str, at: DateTime<Utc>, observations: &[Observation]) {
        let mut devices = self.devices.write().await;
        let entry = devices
            .entry(device.to_string())
            .or_insert_with(|| DeviceEntry::new(address, at));

        entry.address = address.to_string();
        entry.last_seen = at;
        for o in observations {
            entry.set(&o.metric, &o.field, &o.value, o.kind);
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.devices.read().await.clone()
    }

    /// Drop every device with `now - last_seen > ttl`. A device exactly
    /// `ttl` old is kept. Returns the number of devices removed.
    pub async fn evict(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let mut devices = self.devices.write().await;
        let before = devices.len();
        devices.retain(|_, entry| entry.is_live(ttl, now));
        before - devices.len()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_upsert_creates_and_overwrites() {
        let store = DeviceStore::new();
        store.upsert("dev", "temp_mcu", "value", "40", t0()).await;
        store.upsert("dev", "temp_mcu", "value", "41", t0()).await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot["dev"].field("temp_mcu", "value"), Some("41"));
        assert_eq!(snapshot["dev"].metrics["temp_mcu"].len(), 1);
    }

    #[test]
    fn test_only_finite_numbers_are_samples() {
        let value = |value: &str, kind| StoredValue {
            value: value.to_string(),
            kind,
        };

        assert_eq!(value("42.5", ValueKind::Number).sample(), Some(42.5));
        assert_eq!(value("-3", ValueKind::Number).sample(), Some(-3.0));
        assert_eq!(value("NaN", ValueKind::Number).sample(), None);
        assert_eq!(value("inf", ValueKind::Number).sample(), None);
        assert_eq!(value("6.1.2", ValueKind::Number).sample(), None);
        assert_eq!(value("42", ValueKind::Text).sample(), None);
        assert_eq!(value("1", ValueKind::Index).sample(), None);
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let store = DeviceStore::new();
        let observations = vec![
            Observation::new("fan0_1", "pwm", "128"),
            Observation::new("fan0_1", "state", "1"),
        ];

        store.apply("dev", "10.0.0.1", t0(), &observations).await;
        let once = store.snapshot().await;
        store.apply("dev", "10.0.0.1", t0(), &observations).await;
        assert_eq!(store.snapshot().await, once);
    }

    #[tokio::test]
    async fn test_apply_updates_address_and_last_seen() {
        let store = DeviceStore::new();
        store.apply("dev", "10.0.0.1", t0(), &[]).await;
        let later = t0() + Duration::seconds(5);
        store.apply("dev", "10.0.0.2", later, &[]).await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot["dev"].address, "10.0.0.2");
        assert_eq!(snapshot["dev"].last_seen, later);
    }

    #[tokio::test]
    async fn test_evict_boundary_keeps_device_exactly_ttl_old() {
        let store = DeviceStore::new();
        let ttl = Duration::seconds(60);
        store.apply("dev", "10.0.0.1", t0(), &[]).await;

        assert_eq!(store.evict(ttl, t0() + ttl).await, 0);
        assert_eq!(store.len().await, 1);

        assert_eq!(store.evict(ttl, t0() + ttl + Duration::milliseconds(1)).await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_evict_only_stale_devices() {
        let store = DeviceStore::new();
        let ttl = Duration::seconds(60);
        store.apply("old", "10.0.0.1", t0(), &[]).await;
        store.apply("new", "10.0.0.2", t0() + Duration::seconds(30), &[]).await;

        let removed = store.evict(ttl, t0() + Duration::seconds(61)).await;
        assert_eq!(removed, 1);
        let snapshot = store.snapshot().await;
        assert!(!snapshot.contains_key("old"));
        assert!(snapshot.contains_key("new"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_for_different_devices() {
        let store = Arc::new(DeviceStore::new());
        let mut handles = Vec::new();

        for d in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let device = format!("dev{}", d);
                for i in 0..50 {
                    store
                        .upsert(&device, "counter", "value", &i.to_string(), t0())
                        .await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 16);
        assert!(snapshot.values().all(|e| e.field("counter", "value") == Some("49")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_snapshot_never_sees_torn_message() {
        let store = Arc::new(DeviceStore::new());

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    let v = i.to_string();
                    let batch = vec![
                        Observation::new("pos", "x", v.as_str()),
                        Observation::new("pos", "y", v.as_str()),
                        Observation::new("pos", "z", v.as_str()),
                    ];
                    store.apply("dev", "10.0.0.1", t0(), &batch).await;
                }
            })
        };

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let snapshot = store.snapshot().await;
                    if let Some(entry) = snapshot.get("dev") {
                        let x = entry.field("pos", "x");
                        assert_eq!(x, entry.field("pos", "y"));
                        assert_eq!(x, entry.field("pos", "z"));
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
    }
}
