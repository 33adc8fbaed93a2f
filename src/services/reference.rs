//! Latest reference-point pose, last writer wins

use crate::domain::types::Position;
use crate::infra::metrics::Metrics;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared holder of the reference pose.
///
/// Writers replace the pose wholesale; the producer reads it when
/// capturing a queued snapshot.
#[derive(Clone)]
pub struct ReferencePointHolder {
    pose: Arc<RwLock<Position>>,
    metrics: Arc<Metrics>,
}

impl ReferencePointHolder {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { pose: Arc::new(RwLock::new(Position::default())), metrics }
    }

    pub fn update(&self, pose: Position) {
        *self.pose.write() = pose;
        self.metrics.record_reference_update();
    }

    pub fn get(&self) -> Position {
        *self.pose.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_origin_and_overwrites() {
        let holder = ReferencePointHolder::new(Arc::new(Metrics::new()));
        assert_eq!(holder.get(), Position::default());

        holder.update(Position::new(1.0, 2.0, 0.5));
        holder.clone().update(Position::planar(-3.0, 4.0));
        assert_eq!(holder.get(), Position::planar(-3.0, 4.0));
    }
}
