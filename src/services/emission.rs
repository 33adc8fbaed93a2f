//! Change-gated emission of QTC batches

use crate::domain::qtc::{QtcArray, QtcHeader, QtcRecord};
use crate::domain::types::Timestamp;

/// Outcome of offering one tick's records to the gate
#[derive(Debug, Clone, PartialEq)]
pub enum EmissionDecision {
    /// Nothing was derived this tick
    Empty,
    /// Same content as the last published batch
    Unchanged,
    Publish(QtcArray),
}

/// Holds the last published batch for equality comparison.
///
/// Only the record list is compared; the header stamp always moves.
#[derive(Debug, Default)]
pub struct EmissionGate {
    last_published: Option<Vec<QtcRecord>>,
}

impl EmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish iff the batch is non-empty and either differs from the last
    /// published one or pruning forces unconditional republish
    pub fn offer(
        &mut self,
        records: Vec<QtcRecord>,
        stamp: Timestamp,
        frame_id: &str,
        pruning: bool,
    ) -> EmissionDecision {
        if records.is_empty() {
            return EmissionDecision::Empty;
        }
        if !pruning && self.last_published.as_ref() == Some(&records) {
            return EmissionDecision::Unchanged;
        }

        self.last_published = Some(records.clone());
        EmissionDecision::Publish(QtcArray {
            header: QtcHeader { stamp, frame_id: frame_id.to_string() },
            qtc: records,
        })
    }

    pub fn last_published(&self) -> Option<&[QtcRecord]> {
        self.last_published.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::qtc::{QtcType, ENTITY_AGENT, REFERENCE_AGENT};
    use crate::domain::types::TrackId;

    fn record(uuid: &str, qtc: &str) -> QtcRecord {
        QtcRecord {
            uuid: TrackId::from(uuid),
            qtc_type: QtcType::Qtcb,
            k: REFERENCE_AGENT.to_string(),
            l: ENTITY_AGENT.to_string(),
            quantisation_factor: 0.01,
            distance_threshold: Some(1.22),
            abstract_distance_threshold: None,
            smoothing_rate: 0.3,
            validated: false,
            collapsed: true,
            qtc_serialised: qtc.to_string(),
            prob_distance_serialised: "[1.0]".to_string(),
        }
    }

    #[test]
    fn test_never_publishes_empty() {
        let mut gate = EmissionGate::new();
        assert_eq!(gate.offer(vec![], Timestamp(1.0), "map", false), EmissionDecision::Empty);
        assert_eq!(gate.offer(vec![], Timestamp(2.0), "map", true), EmissionDecision::Empty);
        assert!(gate.last_published().is_none());
    }

    #[test]
    fn test_identical_batches_publish_once() {
        let mut gate = EmissionGate::new();
        let first = gate.offer(vec![record("a", "[[0,1]]")], Timestamp(1.0), "map", false);
        assert!(matches!(first, EmissionDecision::Publish(_)));

        let second = gate.offer(vec![record("a", "[[0,1]]")], Timestamp(2.0), "map", false);
        assert_eq!(second, EmissionDecision::Unchanged);
    }

    #[test]
    fn test_pruning_republishes() {
        let mut gate = EmissionGate::new();
        for stamp in [1.0, 2.0] {
            let decision = gate.offer(vec![record("a", "[[0,1]]")], Timestamp(stamp), "map", true);
            let EmissionDecision::Publish(batch) = decision else {
                panic!("pruning must republish");
            };
            assert_eq!(batch.header.stamp, Timestamp(stamp));
        }
    }

    #[test]
    fn test_changed_content_replaces_last_published() {
        let mut gate = EmissionGate::new();
        gate.offer(vec![record("a", "[[0,1]]")], Timestamp(1.0), "map", false);
        let decision = gate.offer(vec![record("a", "[[0,-1]]")], Timestamp(2.0), "map", false);
        assert!(matches!(decision, EmissionDecision::Publish(_)));
        assert_eq!(gate.last_published().unwrap()[0].qtc_serialised, "[[0,-1]]");

        // A different subset of tracks is different content
        let decision = gate.offer(vec![record("b", "[[0,-1]]")], Timestamp(3.0), "map", false);
        assert!(matches!(decision, EmissionDecision::Publish(_)));
    }
}
