//! Controller metrics, kept as process-wide atomics and exposed as a JSON
//! snapshot on the metrics endpoint.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Histogram bucket upper bounds for publish duration, in seconds.
const DURATION_BUCKETS: [f64; 11] =
    [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// All controller metrics.
pub struct Metrics {
    sync_success_total: AtomicU64,
    sync_error_total: AtomicU64,
    rotation_new_key_total: AtomicU64,
    rotation_key_expired_total: AtomicU64,
    fetch_errors_total: AtomicU64,
    /// Publish errors keyed by backend name.
    publish_errors_total: DashMap<String, AtomicU64>,
    /// Number of keys in the most recently published JWKS.
    active_keys: AtomicU64,
    /// Unix timestamp of the last successful publish.
    last_publish_timestamp: AtomicU64,
    /// Publish duration histogram: per-bucket counts plus sum/count.
    publish_duration_buckets: [AtomicU64; DURATION_BUCKETS.len()],
    publish_duration_sum_micros: AtomicU64,
    publish_duration_count: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sync_success_total: AtomicU64::new(0),
            sync_error_total: AtomicU64::new(0),
            rotation_new_key_total: AtomicU64::new(0),
            rotation_key_expired_total: AtomicU64::new(0),
            fetch_errors_total: AtomicU64::new(0),
            publish_errors_total: DashMap::new(),
            active_keys: AtomicU64::new(0),
            last_publish_timestamp: AtomicU64::new(0),
            publish_duration_buckets: Default::default(),
            publish_duration_sum_micros: AtomicU64::new(0),
            publish_duration_count: AtomicU64::new(0),
        }
    }

    /// Record a sync outcome.
    pub fn record_sync(&self, success: bool) {
        if success {
            self.sync_success_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sync_error_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a rotation event by its metric label ("new_key" /
    /// "key_expired").
    pub fn record_rotation(&self, kind: &str) {
        match kind {
            "new_key" => self.rotation_new_key_total.fetch_add(1, Ordering::Relaxed),
            "key_expired" => self.rotation_key_expired_total.fetch_add(1, Ordering::Relaxed),
            _ => return,
        };
    }

    /// Record a failed fetch from the API server.
    pub fn record_fetch_error(&self) {
        self.fetch_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a publish error against a backend.
    pub fn record_publish_error(&self, backend: &str) {
        self.publish_errors_total
            .entry(backend.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful publish: duration observation and timestamp.
    pub fn record_publish(&self, duration_seconds: f64, unix_timestamp: u64) {
        for (i, bound) in DURATION_BUCKETS.iter().enumerate() {
            if duration_seconds <= *bound {
                self.publish_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
        self.publish_duration_sum_micros
            .fetch_add((duration_seconds * 1_000_000.0) as u64, Ordering::Relaxed);
        self.publish_duration_count.fetch_add(1, Ordering::Relaxed);
        self.last_publish_timestamp.store(unix_timestamp, Ordering::Relaxed);
    }

    /// Set the number of keys in the most recently published JWKS.
    pub fn set_active_keys(&self, count: usize) {
        self.active_keys.store(count as u64, Ordering::Relaxed);
    }

    /// Snapshot every metric for the metrics endpoint.
    pub fn snapshot(&self, health: BTreeMap<String, bool>) -> MetricsSnapshot {
        let publish_errors: BTreeMap<String, u64> = self
            .publish_errors_total
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        let buckets: Vec<DurationBucket> = DURATION_BUCKETS
            .iter()
            .zip(self.publish_duration_buckets.iter())
            .map(|(le, count)| DurationBucket { le: *le, count: count.load(Ordering::Relaxed) })
            .collect();

        MetricsSnapshot {
            sync_success_total: self.sync_success_total.load(Ordering::Relaxed),
            sync_error_total: self.sync_error_total.load(Ordering::Relaxed),
            rotation_new_key_total: self.rotation_new_key_total.load(Ordering::Relaxed),
            rotation_key_expired_total: self.rotation_key_expired_total.load(Ordering::Relaxed),
            fetch_errors_total: self.fetch_errors_total.load(Ordering::Relaxed),
            publish_errors_total: publish_errors,
            active_keys: self.active_keys.load(Ordering::Relaxed),
            last_publish_timestamp: self.last_publish_timestamp.load(Ordering::Relaxed),
            publish_duration_seconds: DurationHistogram {
                buckets,
                sum: self.publish_duration_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
                count: self.publish_duration_count.load(Ordering::Relaxed),
            },
            health_status: health.into_iter().map(|(k, v)| (k, u64::from(v))).collect(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// One histogram bucket (`le` = inclusive upper bound in seconds).
#[derive(Debug, Clone, Serialize)]
pub struct DurationBucket {
    pub le: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DurationHistogram {
    pub buckets: Vec<DurationBucket>,
    pub sum: f64,
    pub count: u64,
}

/// Serializable view of all metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub sync_success_total: u64,
    pub sync_error_total: u64,
    pub rotation_new_key_total: u64,
    pub rotation_key_expired_total: u64,
    pub fetch_errors_total: u64,
    pub publish_errors_total: BTreeMap<String, u64>,
    pub active_keys: u64,
    pub last_publish_timestamp: u64,
    pub publish_duration_seconds: DurationHistogram,
    pub health_status: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_sync(true);
        metrics.record_sync(true);
        metrics.record_sync(false);
        metrics.record_rotation("new_key");
        metrics.record_rotation("key_expired");
        metrics.record_publish_error("s3");
        metrics.record_publish_error("s3");
        metrics.record_fetch_error();
        metrics.set_active_keys(3);

        let snap = metrics.snapshot(BTreeMap::new());
        assert_eq!(snap.sync_success_total, 2);
        assert_eq!(snap.sync_error_total, 1);
        assert_eq!(snap.rotation_new_key_total, 1);
        assert_eq!(snap.rotation_key_expired_total, 1);
        assert_eq!(snap.publish_errors_total["s3"], 2);
        assert_eq!(snap.fetch_errors_total, 1);
        assert_eq!(snap.active_keys, 3);
    }

    #[test]
    fn test_duration_histogram_buckets() {
        let metrics = Metrics::new();
        metrics.record_publish(0.003, 1_700_000_000);
        metrics.record_publish(0.2, 1_700_000_100);

        let snap = metrics.snapshot(BTreeMap::new());
        assert_eq!(snap.publish_duration_seconds.count, 2);
        assert_eq!(snap.last_publish_timestamp, 1_700_000_100);
        // 0.003 lands in the 0.005 bucket, 0.2 in the 0.25 bucket.
        assert_eq!(snap.publish_duration_seconds.buckets[0].count, 1);
        let quarter = snap
            .publish_duration_seconds
            .buckets
            .iter()
            .find(|b| (b.le - 0.25).abs() < f64::EPSILON)
            .unwrap();
        assert_eq!(quarter.count, 1);
    }

    #[test]
    fn test_unknown_rotation_label_is_ignored() {
        let metrics = Metrics::new();
        metrics.record_rotation("unrelated");
        let snap = metrics.snapshot(BTreeMap::new());
        assert_eq!(snap.rotation_new_key_total, 0);
        assert_eq!(snap.rotation_key_expired_total, 0);
    }
}
