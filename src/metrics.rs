//! Metrics and observability for the media cache

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Global metrics collector
#[derive(Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_latency_ms: AtomicU64,

    // Per-operation counters
    pub get_count: AtomicU64,
    pub get_all_count: AtomicU64,
    pub remove_count: AtomicU64,
    pub status_count: AtomicU64,

    // Cache behaviour
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub conversions_published: AtomicU64,
    pub conversions_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, op: &str, success: bool, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        match op {
            "cache.get" => self.get_count.fetch_add(1, Ordering::Relaxed),
            "cache.get_all" => self.get_all_count.fetch_add(1, Ordering::Relaxed),
            "cache.remove" => self.remove_count.fetch_add(1, Ordering::Relaxed),
            "cache.status" => self.status_count.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_conversion(&self, published: bool) {
        if published {
            self.conversions_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.conversions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: failed,
            error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
            avg_latency_ms: if total > 0 { total_latency / total } else { 0 },
            operations: OperationMetrics {
                get: self.get_count.load(Ordering::Relaxed),
                get_all: self.get_all_count.load(Ordering::Relaxed),
                remove: self.remove_count.load(Ordering::Relaxed),
                status: self.status_count.load(Ordering::Relaxed),
            },
            cache: CacheMetrics {
                hits,
                misses,
                hit_rate: if hits + misses > 0 { hits as f64 / (hits + misses) as f64 } else { 0.0 },
                conversions_published: self.conversions_published.load(Ordering::Relaxed),
                conversions_failed: self.conversions_failed.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub operations: OperationMetrics,
    pub cache: CacheMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub get: u64,
    pub get_all: u64,
    pub remove: u64,
    pub status: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub conversions_published: u64,
    pub conversions_failed: u64,
}

/// Timer for tracking operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_rates() {
        let metrics = Metrics::new();
        metrics.record_request("cache.get", true, 10);
        metrics.record_request("cache.get", false, 30);
        metrics.record_request("cache.remove", true, 2);
        metrics.record_lookup(true);
        metrics.record_lookup(true);
        metrics.record_lookup(false);
        metrics.record_lookup(false);
        metrics.record_conversion(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.avg_latency_ms, 14);
        assert_eq!(snapshot.operations.get, 2);
        assert_eq!(snapshot.operations.remove, 1);
        assert_eq!(snapshot.cache.hit_rate, 0.5);
        assert_eq!(snapshot.cache.conversions_published, 1);
        assert_eq!(snapshot.cache.conversions_failed, 0);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Metrics::default().snapshot();
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.cache.hit_rate, 0.0);
    }
}
