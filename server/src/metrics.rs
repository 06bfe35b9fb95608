// Metrics collection and tracking

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Request count and latency, safe under concurrent recorders.
///
/// Count and totals live under one lock so every read sees a matching pair.
#[derive(Debug, Default)]
pub struct LatencyStats {
    totals: Mutex<LatencyTotals>,
}

#[derive(Debug, Default, Clone, Copy)]
struct LatencyTotals {
    count: u64,
    total_ms: f64,
    min_ms: Option<f64>,
    max_ms: f64,
}

impl LatencyTotals {
    fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total_ms / self.count as f64
    }
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, latency_ms: f64) {
        let latency_ms = latency_ms.max(0.0);
        let mut totals = self.totals();
        totals.count += 1;
        totals.total_ms += latency_ms;
        totals.min_ms = Some(totals.min_ms.map_or(latency_ms, |min| min.min(latency_ms)));
        totals.max_ms = totals.max_ms.max(latency_ms);
    }

    pub fn count(&self) -> u64 {
        self.totals().count
    }

    pub fn avg_latency_ms(&self) -> f64 {
        self.totals().avg_ms()
    }

    pub fn min_latency_ms(&self) -> f64 {
        self.totals().min_ms.unwrap_or(0.0)
    }

    pub fn max_latency_ms(&self) -> f64 {
        self.totals().max_ms
    }

    fn totals(&self) -> MutexGuard<'_, LatencyTotals> {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hit/miss counters for one cache.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Percentage of lookups that hit.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            return 0.0;
        }
        (hits as f64 / total as f64) * 100.0
    }
}

/// Process-lifetime pipeline metrics.
///
/// Owned by whoever builds the orchestrator and shared by handle; the
/// orchestrator records, reporting code only reads.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub requests: LatencyStats,
    pub ai_cache: CacheCounters,
    pub audio_cache: CacheCounters,
    pub synthesis: LatencyStats,
    synthesis_failures: AtomicU64,
    brain_faults: AtomicU64,
}

/// Point-in-time view of request metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub average_latency_ms: f64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request.
    pub fn record(&self, latency_ms: f64) {
        self.requests.record(latency_ms);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let totals = *self.requests.totals();
        MetricsSnapshot {
            request_count: totals.count,
            average_latency_ms: totals.avg_ms(),
        }
    }

    pub fn record_synthesis(&self, latency_ms: f64, produced_audio: bool) {
        self.synthesis.record(latency_ms);
        if !produced_audio {
            self.synthesis_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_brain_fault(&self) {
        self.brain_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn synthesis_failures(&self) -> u64 {
        self.synthesis_failures.load(Ordering::Relaxed)
    }

    pub fn brain_faults(&self) -> u64 {
        self.brain_faults.load(Ordering::Relaxed)
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub requests: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub brain_faults: u64,
    pub uptime_seconds: u64,
    pub ai_cache: CacheStats,
    pub audio_cache: CacheStats,
    pub synthesis: SynthesisStats,
    pub system: SystemMetrics,
}

#[derive(Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Serialize)]
pub struct SynthesisStats {
    pub calls: u64,
    pub failures: u64,
    pub avg_synthesis_time_ms: f64,
    pub in_flight: usize,
    pub max_concurrency: usize,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub system_load: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_is_zero_before_any_request() {
        let metrics = PipelineMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.request_count, 0);
        assert_eq!(snapshot.average_latency_ms, 0.0);
        assert_eq!(metrics.requests.min_latency_ms(), 0.0);
    }

    #[test]
    fn test_average_latency() {
        let metrics = PipelineMetrics::new();
        metrics.record(100.0);
        metrics.record(150.0);
        metrics.record(50.0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.request_count, 3);
        assert_eq!(snapshot.average_latency_ms, 100.0);
        assert_eq!(metrics.requests.min_latency_ms(), 50.0);
        assert_eq!(metrics.requests.max_latency_ms(), 150.0);
    }

    #[test]
    fn test_fractional_latency_is_kept() {
        let stats = LatencyStats::new();
        stats.record(0.25);
        stats.record(0.75);
        assert!((stats.avg_latency_ms() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let metrics = Arc::new(PipelineMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.record(2.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.request_count, 8000);
        assert_eq!(snapshot.average_latency_ms, 2.0);
    }

    #[test]
    fn test_snapshot_pairs_count_with_total() {
        let metrics = Arc::new(PipelineMetrics::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        metrics.record(2.0);
                    }
                })
            })
            .collect();

        // every record is 2ms, so any consistent snapshot averages exactly 2
        for _ in 0..2000 {
            let snapshot = metrics.snapshot();
            if snapshot.request_count > 0 {
                assert_eq!(snapshot.average_latency_ms, 2.0);
            }
        }
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(metrics.snapshot().request_count, 8000);
    }

    #[test]
    fn test_cache_hit_rate() {
        let counters = CacheCounters::default();
        assert_eq!(counters.hit_rate(), 0.0);
        counters.record_hit();
        counters.record_miss();
        counters.record_miss();
        counters.record_hit();
        assert_eq!(counters.hit_rate(), 50.0);
    }

    #[test]
    fn test_synthesis_failures_counted() {
        let metrics = PipelineMetrics::new();
        metrics.record_synthesis(10.0, true);
        metrics.record_synthesis(5.0, false);
        assert_eq!(metrics.synthesis.count(), 2);
        assert_eq!(metrics.synthesis_failures(), 1);
    }
}
