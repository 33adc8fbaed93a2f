//! FIFO ingestion queue between the MQTT producer and the processor
//!
//! Producers only append; the processor is the single consumer. The default
//! queue is unbounded and never drops. A bounded variant discards either the
//! oldest queued event or the incoming one when full.

use crate::domain::types::{EntitiesReport, PendingEvent, Position};
use crate::infra::config::OverflowPolicy;
use crate::infra::metrics::Metrics;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Capacity policy of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    Unbounded,
    DropOldest(usize),
    DropNewest(usize),
}

impl QueuePolicy {
    /// A capacity of 0 means unbounded
    pub fn from_config(capacity: usize, overflow: OverflowPolicy) -> Self {
        match (capacity, overflow) {
            (0, _) => QueuePolicy::Unbounded,
            (cap, OverflowPolicy::DropOldest) => QueuePolicy::DropOldest(cap),
            (cap, OverflowPolicy::DropNewest) => QueuePolicy::DropNewest(cap),
        }
    }
}

/// Cheaply cloneable handle to the shared queue
#[derive(Clone)]
pub struct IngestQueue {
    inner: Arc<Mutex<VecDeque<PendingEvent>>>,
    policy: QueuePolicy,
    metrics: Arc<Metrics>,
}

impl IngestQueue {
    pub fn new(policy: QueuePolicy, metrics: Arc<Metrics>) -> Self {
        Self { inner: Arc::new(Mutex::new(VecDeque::new())), policy, metrics }
    }

    pub fn unbounded(metrics: Arc<Metrics>) -> Self {
        Self::new(QueuePolicy::Unbounded, metrics)
    }

    /// Append a snapshot to the tail. Never blocks.
    ///
    /// Returns `false` when a bounded queue rejected the incoming event.
    pub fn enqueue(&self, report: EntitiesReport, reference: Position) -> bool {
        let event = PendingEvent { report, reference };
        let mut queue = self.inner.lock();

        match self.policy {
            QueuePolicy::Unbounded => {}
            QueuePolicy::DropOldest(cap) => {
                while queue.len() >= cap {
                    queue.pop_front();
                    self.metrics.record_event_dropped();
                    debug!(capacity = %cap, "ingest_drop_oldest");
                }
            }
            QueuePolicy::DropNewest(cap) => {
                if queue.len() >= cap {
                    self.metrics.record_event_dropped();
                    debug!(capacity = %cap, "ingest_drop_newest");
                    return false;
                }
            }
        }

        queue.push_back(event);
        self.metrics.record_event_enqueued();
        true
    }

    /// Remove and return the head, or `None` when empty
    pub fn dequeue_one(&self) -> Option<PendingEvent> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Timestamp;

    fn report(stamp: f64) -> EntitiesReport {
        EntitiesReport { stamp: Timestamp(stamp), frame_id: "map".to_string(), entities: vec![] }
    }

    fn stamps(queue: &IngestQueue) -> Vec<f64> {
        std::iter::from_fn(|| queue.dequeue_one()).map(|e| e.report.stamp.secs()).collect()
    }

    #[test]
    fn test_fifo_order() {
        let queue = IngestQueue::unbounded(Arc::new(Metrics::new()));
        for i in 0..5 {
            assert!(queue.enqueue(report(i as f64), Position::default()));
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(stamps(&queue), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert!(queue.dequeue_one().is_none());
    }

    #[test]
    fn test_reference_snapshot_captured_at_enqueue() {
        let queue = IngestQueue::unbounded(Arc::new(Metrics::new()));
        queue.enqueue(report(0.0), Position::planar(1.0, 2.0));
        queue.enqueue(report(1.0), Position::planar(3.0, 4.0));

        assert_eq!(queue.dequeue_one().unwrap().reference, Position::planar(1.0, 2.0));
        assert_eq!(queue.dequeue_one().unwrap().reference, Position::planar(3.0, 4.0));
    }

    #[test]
    fn test_drop_oldest() {
        let metrics = Arc::new(Metrics::new());
        let queue = IngestQueue::new(QueuePolicy::DropOldest(2), metrics.clone());
        for i in 0..4 {
            assert!(queue.enqueue(report(i as f64), Position::default()));
        }
        assert_eq!(stamps(&queue), vec![2.0, 3.0]);
        assert_eq!(metrics.events_dropped(), 2);
    }

    #[test]
    fn test_drop_newest() {
        let metrics = Arc::new(Metrics::new());
        let queue = IngestQueue::new(QueuePolicy::DropNewest(2), metrics.clone());
        assert!(queue.enqueue(report(0.0), Position::default()));
        assert!(queue.enqueue(report(1.0), Position::default()));
        assert!(!queue.enqueue(report(2.0), Position::default()));
        assert_eq!(stamps(&queue), vec![0.0, 1.0]);
        assert_eq!(metrics.events_dropped(), 1);
    }

    #[test]
    fn test_policy_from_config() {
        assert_eq!(QueuePolicy::from_config(0, OverflowPolicy::DropNewest), QueuePolicy::Unbounded);
        assert_eq!(
            QueuePolicy::from_config(8, OverflowPolicy::DropOldest),
            QueuePolicy::DropOldest(8)
        );
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = IngestQueue::unbounded(Arc::new(Metrics::new()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        q.enqueue(report(i as f64), Position::default());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 1000);
    }
}
