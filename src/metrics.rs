//! Refresh-loop observability: cycle latency and load-error counts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Write-only sink for refresh-loop measurements.
pub trait CycleObserver: Send + Sync {
    /// Called once per completed (or aborted) cycle.
    fn record_cycle(&self, feed: &str, duration: Duration, errors: u64);

    /// Called for each feed/directory load failure.
    fn record_load_error(&self, feed: &str, kind: &str);

    /// Called with the per-cycle merge and skip tallies.
    fn record_records(&self, _feed: &str, _merged: u64, _skipped: u64) {}
}

/// Upper bounds of the latency histogram buckets, in milliseconds. A final
/// overflow bucket catches everything slower.
pub const LATENCY_BUCKETS_MS: [u64; 8] = [50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];

/// In-process counters for one feed.
#[derive(Debug, Default)]
pub struct FeedMetrics {
    cycles: AtomicU64,
    load_errors: AtomicU64,
    records_merged: AtomicU64,
    records_skipped: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMetricsSnapshot {
    pub cycles: u64,
    pub load_errors: u64,
    pub records_merged: u64,
    pub records_skipped: u64,
    pub latency_sum_ms: u64,
    /// Non-cumulative counts, one per entry of [`LATENCY_BUCKETS_MS`] plus overflow.
    pub latency_buckets: Vec<u64>,
}

impl FeedMetrics {
    #[must_use]
    pub fn snapshot(&self) -> FeedMetricsSnapshot {
        FeedMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            load_errors: self.load_errors.load(Ordering::Relaxed),
            records_merged: self.records_merged.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            latency_sum_ms: self.latency_sum_ms.load(Ordering::Relaxed),
            latency_buckets: self
                .latency_buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
        }
    }

    fn bucket_index(ms: u64) -> usize {
        LATENCY_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len())
    }
}

impl CycleObserver for FeedMetrics {
    fn record_cycle(&self, _feed: &str, duration: Duration, _errors: u64) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_buckets[Self::bucket_index(ms)].fetch_add(1, Ordering::Relaxed);
    }

    fn record_load_error(&self, _feed: &str, _kind: &str) {
        self.load_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_records(&self, _feed: &str, merged: u64, skipped: u64) {
        self.records_merged.fetch_add(merged, Ordering::Relaxed);
        self.records_skipped.fetch_add(skipped, Ordering::Relaxed);
    }
}
