//! Tests for the Processor module

use super::*;
use crate::domain::qtc::QtcArray;
use crate::domain::types::{EntitiesReport, EntityObservation, Position};
use crate::infra::error::TransformError;
use crate::infra::params::{ParamsHandle, ParamsUpdate};
use crate::io::egress_channel::{create_egress_channel, EgressMessage};
use crate::services::classifier::QtcClassifier;
use crate::services::transform::{StaticFrameGraph, TransformService};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Test harness that keeps the egress receiver alive so `try_send` succeeds
struct TestProcessor {
    processor: Processor,
    egress_rx: mpsc::Receiver<EgressMessage>,
    params: ParamsHandle,
    metrics: Arc<Metrics>,
}

impl std::ops::Deref for TestProcessor {
    type Target = Processor;
    fn deref(&self) -> &Self::Target {
        &self.processor
    }
}

impl std::ops::DerefMut for TestProcessor {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.processor
    }
}

impl TestProcessor {
    /// Run one event with the parameters currently in force
    async fn feed(&mut self, event: PendingEvent) -> EmissionDecision {
        let params = self.processor.snapshot_params();
        self.processor.process_event(event, &params).await
    }

    fn published(&mut self) -> Vec<QtcArray> {
        let mut out = Vec::new();
        while let Ok(msg) = self.egress_rx.try_recv() {
            if let EgressMessage::Qtc(batch) = msg {
                out.push(batch);
            }
        }
        out
    }

    fn history_len(&self, id: &str) -> usize {
        self.track(&TrackId::from(id)).map(|t| t.history().len()).unwrap_or(0)
    }
}

/// Fails every lookup for positions with negative x
struct NegativeXFails;

#[async_trait]
impl TransformService for NegativeXFails {
    async fn transform_position(
        &self,
        source_frame: &str,
        _target_frame: &str,
        position: Position,
    ) -> Result<Position, TransformError> {
        if position.x < 0.0 {
            Err(TransformError::UnknownFrame(source_frame.to_string()))
        } else {
            Ok(position)
        }
    }
}

fn scenario_params() -> Params {
    Params { smoothing_rate: 1.0, decay_time: 5.0, processing_rate_hz: 10.0, ..Params::default() }
}

fn create_test_processor(params: Params) -> TestProcessor {
    create_test_processor_with_service(params, Arc::new(StaticFrameGraph::new()))
}

fn create_test_processor_with_service(
    params: Params,
    service: Arc<dyn TransformService>,
) -> TestProcessor {
    let metrics = Arc::new(Metrics::new());
    let (params_handle, params_rx) = ParamsHandle::new(params, metrics.clone());
    let (egress, egress_rx) = create_egress_channel(64, "test".to_string(), metrics.clone());
    let normalizer =
        CoordinateNormalizer::new(service, "map", Duration::from_millis(50), metrics.clone());
    let processor = Processor::new(
        IngestQueue::unbounded(metrics.clone()),
        normalizer,
        Arc::new(QtcClassifier),
        params_rx,
        metrics.clone(),
        Some(egress),
    );
    TestProcessor { processor, egress_rx, params: params_handle, metrics }
}

/// Builder for creating test PendingEvent instances
struct EventBuilder {
    stamp: f64,
    frame_id: String,
    reference: Position,
    entities: Vec<EntityObservation>,
}

impl EventBuilder {
    fn at(stamp: f64) -> Self {
        Self { stamp, frame_id: "map".to_string(), reference: Position::default(), entities: vec![] }
    }

    fn frame(mut self, frame_id: &str) -> Self {
        self.frame_id = frame_id.to_string();
        self
    }

    fn reference(mut self, x: f64, y: f64) -> Self {
        self.reference = Position::planar(x, y);
        self
    }

    fn entity(mut self, id: &str, x: f64, y: f64) -> Self {
        self.entities
            .push(EntityObservation { track_id: TrackId::from(id), position: Position::planar(x, y) });
        self
    }

    fn build(self) -> PendingEvent {
        PendingEvent {
            report: EntitiesReport {
                stamp: Timestamp(self.stamp),
                frame_id: self.frame_id,
                entities: self.entities,
            },
            reference: self.reference,
        }
    }
}

// ============================================================================
// Smoothing, classification and decay
// ============================================================================

#[tokio::test]
async fn test_walkthrough_smooth_classify_publish_decay() {
    let mut p = create_test_processor(scenario_params());

    // First window: two samples at distance 1
    let d = p.feed(EventBuilder::at(0.0).entity("T1", 1.0, 0.0).build()).await;
    assert_eq!(d, EmissionDecision::Empty);
    let d = p.feed(EventBuilder::at(0.9).entity("T1", 1.0, 0.0).build()).await;
    assert_eq!(d, EmissionDecision::Empty);
    assert_eq!(p.history_len("T1"), 0);

    // Deadline reached: first window flushes before the new sample opens the next
    let d = p.feed(EventBuilder::at(1.0).entity("T1", 2.0, 0.0).build()).await;
    assert_eq!(d, EmissionDecision::Empty);
    let track = p.track(&TrackId::from("T1")).unwrap();
    assert_eq!(track.history(), &[Sample([0.0, 0.0, 1.0, 0.0])]);
    assert_eq!(track.window().unwrap().start_time, Timestamp(1.0));

    p.feed(EventBuilder::at(1.9).entity("T1", 2.0, 0.0).build()).await;

    // An empty report still advances time and flushes the second window
    let d = p.feed(EventBuilder::at(2.0).build()).await;
    let EmissionDecision::Publish(batch) = d else {
        panic!("expected a publish, got {:?}", d);
    };
    assert_eq!(p.track(&TrackId::from("T1")).unwrap().history()[1], Sample([0.0, 0.0, 2.0, 0.0]));
    assert_eq!(batch.qtc.len(), 1);
    assert_eq!(batch.header.frame_id, "map");
    assert_eq!(batch.header.stamp, Timestamp(1.9));

    let record = &batch.qtc[0];
    assert_eq!(record.uuid, TrackId::from("T1"));
    assert_eq!(record.k, "Robot");
    assert_eq!(record.l, "Human");
    // Distance 2 is beyond the 1.22 threshold: QTC_B, human moving away
    assert_eq!(record.qtc_serialised, "[[0,1]]");
    assert_eq!(record.prob_distance_serialised, "[2.0]");
    assert_eq!(record.distance_threshold, Some(1.22));
    assert_eq!(record.abstract_distance_threshold, None);
    assert_eq!(record.smoothing_rate, 1.0);

    assert_eq!(p.published().len(), 1);

    // Still inside the decay interval (last seen 1.9)
    p.feed(EventBuilder::at(6.5).build()).await;
    assert_eq!(p.track_count(), 1);

    p.feed(EventBuilder::at(7.5).build()).await;
    assert_eq!(p.track_count(), 0);
    assert_eq!(p.metrics.tracks_decayed(), 1);
    assert_eq!(p.metrics.active_tracks(), 0);
}

#[tokio::test]
async fn test_flushed_entry_is_mean_of_window() {
    let mut p = create_test_processor(scenario_params());
    p.feed(EventBuilder::at(0.0).reference(0.0, 0.0).entity("a", 1.0, 1.0).build()).await;
    p.feed(EventBuilder::at(0.25).reference(1.0, 0.0).entity("a", 2.0, 3.0).build()).await;
    p.feed(EventBuilder::at(0.5).reference(2.0, 0.0).entity("a", 3.0, 5.0).build()).await;
    p.feed(EventBuilder::at(1.0).build()).await;

    let track = p.track(&TrackId::from("a")).unwrap();
    assert_eq!(track.history(), &[Sample([1.0, 0.0, 2.0, 3.0])]);
    assert!(track.window().is_none());
}

#[tokio::test]
async fn test_single_entry_history_never_publishes() {
    let mut p = create_test_processor(scenario_params());
    for i in 0..5 {
        let d = p.feed(EventBuilder::at(i as f64 * 0.5).entity(&format!("t{i}"), 1.0, 0.0).build()).await;
        assert_eq!(d, EmissionDecision::Empty);
    }
    assert!(p.published().is_empty());
    assert_eq!(p.metrics.batches_published(), 0);
}

#[tokio::test]
async fn test_track_with_only_open_window_decays() {
    // Window never reaches its deadline, so the track holds no history
    let params = Params { smoothing_rate: 100.0, decay_time: 5.0, ..Params::default() };
    let mut p = create_test_processor(params);

    p.feed(EventBuilder::at(0.0).entity("a", 1.0, 0.0).build()).await;
    p.feed(EventBuilder::at(3.0).build()).await;
    let track = p.track(&TrackId::from("a")).unwrap();
    assert!(track.history().is_empty());
    assert_eq!(track.window().unwrap().samples.len(), 1);

    p.feed(EventBuilder::at(6.0).build()).await;
    assert_eq!(p.track_count(), 0);
    assert_eq!(p.metrics.tracks_decayed(), 1);
}

// ============================================================================
// Emission gate
// ============================================================================

fn instant_params(prune: bool) -> Params {
    let mut params = Params { smoothing_rate: 0.0, decay_time: 60.0, ..Params::default() };
    params.prune_buffer = prune;
    if prune {
        params.qtc.validate = false;
        params.qtc.no_collapse = false;
    }
    params
}

#[tokio::test]
async fn test_identical_batches_published_once() {
    let mut p = create_test_processor(instant_params(false));
    for i in 0..4 {
        p.feed(EventBuilder::at(i as f64).entity("a", 1.0, 0.0).build()).await;
    }

    assert_eq!(p.published().len(), 1);
    assert_eq!(p.metrics.batches_published(), 1);
    assert_eq!(p.metrics.batches_suppressed(), 2);
    assert_eq!(p.history_len("a"), 4);
}

#[tokio::test]
async fn test_pruning_republishes_and_bounds_history() {
    let mut p = create_test_processor(instant_params(true));
    for i in 0..4 {
        p.feed(EventBuilder::at(i as f64).entity("a", 1.0, 0.0).build()).await;
        assert!(p.history_len("a") <= 1);
    }

    let batches = p.published();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].qtc, batches[2].qtc);
    assert!(!batches[0].qtc[0].validated);
}

#[tokio::test]
async fn test_records_ordered_by_track_id() {
    let mut p = create_test_processor(instant_params(false));
    for i in 0..2 {
        p.feed(
            EventBuilder::at(i as f64)
                .entity("zeta", 1.0 + i as f64, 0.0)
                .entity("alpha", 0.0, 1.0 + i as f64)
                .build(),
        )
        .await;
    }

    let batches = p.published();
    let ids: Vec<&str> = batches[0].qtc.iter().map(|r| r.uuid.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "zeta"]);
}

// ============================================================================
// Transform failures
// ============================================================================

#[tokio::test]
async fn test_transform_failure_isolated_per_entity() {
    let mut p = create_test_processor_with_service(scenario_params(), Arc::new(NegativeXFails));

    p.feed(
        EventBuilder::at(0.0).frame("camera").entity("good", 1.0, 0.0).entity("bad", -1.0, 0.0).build(),
    )
    .await;

    assert!(p.track(&TrackId::from("good")).is_some());
    assert!(p.track(&TrackId::from("bad")).is_none());
    assert_eq!(p.metrics.transform_failures(), 1);
}

#[tokio::test]
async fn test_transform_failure_leaves_existing_track_untouched() {
    let mut p = create_test_processor_with_service(scenario_params(), Arc::new(NegativeXFails));
    p.feed(EventBuilder::at(0.0).frame("camera").entity("a", 1.0, 0.0).build()).await;
    p.feed(EventBuilder::at(0.5).frame("camera").entity("a", -1.0, 0.0).build()).await;

    let track = p.track(&TrackId::from("a")).unwrap();
    assert_eq!(track.window().unwrap().samples.len(), 1);
    assert_eq!(track.last_seen(), Timestamp(0.0));
}

// ============================================================================
// Scheduling and live parameters
// ============================================================================

#[tokio::test]
async fn test_tick_drains_batch_size() {
    let mut params = scenario_params();
    params.drain_batch_size = 2;
    let mut p = create_test_processor(params.clone());
    for i in 0..3 {
        p.queue.enqueue(EventBuilder::at(i as f64).build().report, Position::default());
    }

    p.processor.tick(&params).await;
    assert_eq!(p.queue.len(), 1);
    assert_eq!(p.metrics.events_total(), 2);
}

#[tokio::test]
async fn test_default_tick_processes_one_event() {
    let params = scenario_params();
    let mut p = create_test_processor(params.clone());
    p.queue.enqueue(EventBuilder::at(0.0).build().report, Position::default());
    p.queue.enqueue(EventBuilder::at(1.0).build().report, Position::default());

    p.processor.tick(&params).await;
    assert_eq!(p.queue.len(), 1);
}

#[tokio::test]
async fn test_params_update_seen_at_next_snapshot() {
    let mut p = create_test_processor(scenario_params());
    assert!(!p.processor.snapshot_params().prune_buffer);

    p.params.apply(&ParamsUpdate { prune_buffer: Some(true), ..Default::default() }).unwrap();
    let snapshot = p.processor.snapshot_params();
    assert!(snapshot.prune_buffer);
    assert!(!snapshot.qtc.validate);
}

#[tokio::test]
async fn test_unrepresentable_smoothing_rejected_processing_continues() {
    let mut p = create_test_processor(scenario_params());

    let update = ParamsUpdate { smoothing_rate: Some(1e20), ..Default::default() };
    assert!(p.params.apply(&update).is_err());
    let update = ParamsUpdate { processing_rate: Some(1e-30), ..Default::default() };
    assert!(p.params.apply(&update).is_err());

    let snapshot = p.processor.snapshot_params();
    assert_eq!(snapshot.smoothing_rate, 1.0);
    p.feed(EventBuilder::at(0.0).entity("a", 1.0, 0.0).build()).await;
    p.feed(EventBuilder::at(1.0).entity("a", 2.0, 0.0).build()).await;
    assert_eq!(p.history_len("a"), 1);
}

#[tokio::test]
async fn test_run_without_drain_leaves_queue() {
    let TestProcessor { processor, metrics, .. } =
        create_test_processor(Params { processing_rate_hz: 0.5, ..scenario_params() });
    let processor = processor.with_drain_on_shutdown(false);
    let queue = processor.queue.clone();
    for i in 0..3 {
        queue.enqueue(EventBuilder::at(i as f64).entity("a", 1.0, 0.0).build().report, Position::default());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_tx.send(true).unwrap();
    let handle = tokio::spawn(async move {
        let mut processor = processor;
        processor.run(shutdown_rx).await;
        processor
    });

    handle.await.unwrap();
    // At most the immediate first tick ran before the shutdown was seen
    assert!(queue.len() >= 2);
    assert!(metrics.events_total() <= 1);
}

#[tokio::test]
async fn test_run_drains_queue_on_shutdown() {
    let TestProcessor { processor, egress_rx, metrics, .. } =
        create_test_processor(Params { processing_rate_hz: 0.5, ..scenario_params() });
    let queue = processor.queue.clone();
    for i in 0..3 {
        queue.enqueue(EventBuilder::at(i as f64).entity("a", 1.0, 0.0).build().report, Position::default());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut processor = processor;
        processor.run(shutdown_rx).await;
        processor
    });
    shutdown_tx.send(true).unwrap();

    let processor = handle.await.unwrap();
    assert!(queue.is_empty());
    assert_eq!(metrics.events_total(), 3);
    assert_eq!(processor.track_count(), 1);
    drop(egress_rx);
}
