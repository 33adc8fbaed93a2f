//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to send batches to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::qtc::QtcArray;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_NUM_BUCKETS};
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::warn;

/// Wall-clock milliseconds since the Unix epoch
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Batch of QTC records accepted by the emission gate
    Qtc(QtcArray),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Total events processed
    pub events_total: u64,
    /// Events per second
    pub events_per_sec: f64,
    /// Average processing latency (microseconds)
    pub avg_latency_us: u64,
    /// Max processing latency (microseconds)
    pub max_latency_us: u64,
    /// Event processing latency histogram buckets (Prometheus-style exponential)
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    /// Current ingestion queue depth (snapshot)
    pub queue_depth: u64,
    pub queue_depth_max: u64,
    pub events_dropped: u64,
    pub active_tracks: u64,
    pub transform_failures: u64,
    pub batches_published: u64,
    pub batches_suppressed: u64,
    pub tracks_decayed: u64,
}

impl MetricsPayload {
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            events_total: summary.events_total,
            events_per_sec: summary.events_per_sec,
            avg_latency_us: summary.avg_process_latency_us,
            max_latency_us: summary.max_process_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p50_us: summary.lat_p50_us,
            lat_p95_us: summary.lat_p95_us,
            lat_p99_us: summary.lat_p99_us,
            queue_depth: summary.queue_depth,
            queue_depth_max: summary.queue_depth_max,
            events_dropped: summary.events_dropped,
            active_tracks: summary.active_tracks,
            transform_failures: summary.transform_failures,
            batches_published: summary.batches_published,
            batches_suppressed: summary.batches_suppressed,
            tracks_decayed: summary.tracks_decayed,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
    metrics: Arc<Metrics>,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String, metrics: Arc<Metrics>) -> Self {
        Self { tx, site_id, metrics }
    }

    /// Hand a batch to the publisher. Returns `false` if it was dropped.
    pub fn send_qtc(&self, batch: QtcArray) -> bool {
        // Use try_send to avoid blocking the processing loop
        match self.tx.try_send(EgressMessage::Qtc(batch)) {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_egress_dropped();
                warn!(error = %e, "qtc_egress_dropped");
                false
            }
        }
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// Buffer size determines how many messages can be queued.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
    metrics: Arc<Metrics>,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id, metrics), rx)
}
