//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Queue depth above which each new high-water mark is logged
const QUEUE_DEPTH_WARN: u64 = 100;

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Entities reports accepted into the ingestion queue (monotonic)
    events_enqueued: AtomicU64,
    /// Reports discarded by a bounded queue's overflow policy (monotonic)
    events_dropped: AtomicU64,
    /// Reports run through the pipeline (monotonic)
    events_total: AtomicU64,
    /// Reports processed since last report (reset on report)
    events_since_report: AtomicU64,
    /// Sum of per-event processing latencies (reset on report)
    latency_sum_us: AtomicU64,
    /// Max per-event processing latency (reset on report)
    latency_max_us: AtomicU64,
    /// Per-event processing latency histogram (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Current ingestion queue depth (sampled each tick)
    queue_depth: AtomicU64,
    /// Highest queue depth observed (monotonic)
    queue_depth_max: AtomicU64,
    /// Reference pose overwrites (monotonic)
    reference_updates: AtomicU64,
    /// Entities skipped because their frame could not be resolved (monotonic)
    transform_failures: AtomicU64,
    /// Smoothing windows flushed into history (monotonic)
    window_flushes: AtomicU64,
    /// Successful classifier invocations (monotonic)
    classifications: AtomicU64,
    /// Failed classifier invocations (monotonic)
    classifier_errors: AtomicU64,
    /// Batches handed to egress (monotonic)
    batches_published: AtomicU64,
    /// Non-empty batches held back as unchanged (monotonic)
    batches_suppressed: AtomicU64,
    /// Batches lost because the egress channel was full (monotonic)
    egress_dropped: AtomicU64,
    /// Tracks removed by decay (monotonic)
    tracks_decayed: AtomicU64,
    /// Tracks currently held by the processor
    active_tracks: AtomicU64,
    /// Parameter updates applied (monotonic)
    params_applied: AtomicU64,
    /// Parameter updates rejected (monotonic)
    params_rejected: AtomicU64,
    /// Malformed ingress payloads (monotonic)
    parse_errors: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_enqueued: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            events_total: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            queue_depth: AtomicU64::new(0),
            queue_depth_max: AtomicU64::new(0),
            reference_updates: AtomicU64::new(0),
            transform_failures: AtomicU64::new(0),
            window_flushes: AtomicU64::new(0),
            classifications: AtomicU64::new(0),
            classifier_errors: AtomicU64::new(0),
            batches_published: AtomicU64::new(0),
            batches_suppressed: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
            tracks_decayed: AtomicU64::new(0),
            active_tracks: AtomicU64::new(0),
            params_applied: AtomicU64::new(0),
            params_rejected: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a report accepted into the queue (lock-free)
    #[inline]
    pub fn record_event_enqueued(&self) {
        self.events_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a report discarded by the overflow policy (lock-free)
    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event was processed with given latency (lock-free)
    #[inline]
    pub fn record_event_processed(&self, latency_us: u64) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        // Update histogram bucket
        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        // Update max
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    /// Set current queue depth and track the high-water mark
    #[inline]
    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
        let previous_max = self.queue_depth_max.fetch_max(depth, Ordering::Relaxed);
        if depth > previous_max && depth >= QUEUE_DEPTH_WARN {
            warn!(queue_depth = %depth, "ingest_queue_backlog");
        }
    }

    #[inline]
    pub fn record_reference_update(&self) {
        self.reference_updates.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transform_failure(&self) {
        self.transform_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_window_flush(&self) {
        self.window_flushes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_classification(&self) {
        self.classifications.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_classifier_error(&self) {
        self.classifier_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch_published(&self) {
        self.batches_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch_suppressed(&self) {
        self.batches_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tracks_decayed(&self, count: u64) {
        self.tracks_decayed.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_active_tracks(&self, count: u64) {
        self.active_tracks.store(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_params_applied(&self) {
        self.params_applied.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_params_rejected(&self) {
        self.params_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total events processed
    #[inline]
    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn transform_failures(&self) -> u64 {
        self.transform_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn batches_published(&self) -> u64 {
        self.batches_published.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn batches_suppressed(&self) -> u64 {
        self.batches_suppressed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tracks_decayed(&self) -> u64 {
        self.tracks_decayed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn active_tracks(&self) -> u64 {
        self.active_tracks.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let events_count = self.events_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        // Calculate elapsed time and reset
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let events_per_sec = if elapsed.as_secs_f64() > 0.0 {
            events_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if events_count > 0 { latency_sum / events_count } else { 0 };

        MetricsSummary {
            events_enqueued: self.events_enqueued.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_total: self.events_total.load(Ordering::Relaxed),
            events_per_sec,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            queue_depth_max: self.queue_depth_max.load(Ordering::Relaxed),
            reference_updates: self.reference_updates.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            window_flushes: self.window_flushes.load(Ordering::Relaxed),
            classifications: self.classifications.load(Ordering::Relaxed),
            classifier_errors: self.classifier_errors.load(Ordering::Relaxed),
            batches_published: self.batches_published.load(Ordering::Relaxed),
            batches_suppressed: self.batches_suppressed.load(Ordering::Relaxed),
            egress_dropped: self.egress_dropped.load(Ordering::Relaxed),
            tracks_decayed: self.tracks_decayed.load(Ordering::Relaxed),
            active_tracks: self.active_tracks.load(Ordering::Relaxed),
            params_applied: self.params_applied.load(Ordering::Relaxed),
            params_rejected: self.params_rejected.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub events_enqueued: u64,
    pub events_dropped: u64,
    pub events_total: u64,
    pub events_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Per-event processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub queue_depth: u64,
    pub queue_depth_max: u64,
    pub reference_updates: u64,
    pub transform_failures: u64,
    pub window_flushes: u64,
    pub classifications: u64,
    pub classifier_errors: u64,
    pub batches_published: u64,
    pub batches_suppressed: u64,
    pub egress_dropped: u64,
    pub tracks_decayed: u64,
    pub active_tracks: u64,
    pub params_applied: u64,
    pub params_rejected: u64,
    pub parse_errors: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_total = %self.events_total,
            events_per_sec = format!("{:.1}", self.events_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            max_latency_us = %self.max_process_latency_us,
            p99_us = %self.lat_p99_us,
            queue_depth = %self.queue_depth,
            dropped = %self.events_dropped,
            active_tracks = %self.active_tracks,
            transform_failures = %self.transform_failures,
            published = %self.batches_published,
            suppressed = %self.batches_suppressed,
            "metrics"
        );
    }
}
