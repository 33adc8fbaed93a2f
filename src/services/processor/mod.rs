//! Periodic processing loop and per-event pipeline
//!
//! The Processor owns all track state. Each tick it snapshots the live
//! parameters, then drains up to `drain_batch_size` queued events. Every
//! event is one full pass:
//! normalize -> feed -> flush check (all tracks) -> classify -> emission
//! gate -> decay sweep.
//!
//! Time is stream time: the event's header stamp drives window deadlines
//! and decay, so replaying a recording reproduces the same output.

#[cfg(test)]
mod tests;

use crate::domain::qtc::{
    DistanceThreshold, QtcRecord, DISTANCE_BANDS, ENTITY_AGENT, REFERENCE_AGENT,
};
use crate::domain::track::Track;
use crate::domain::types::{PendingEvent, Sample, Timestamp, TrackId};
use crate::infra::metrics::Metrics;
use crate::infra::params::Params;
use crate::io::EgressSender;
use crate::services::classifier::{Classification, Classifier};
use crate::services::emission::{EmissionDecision, EmissionGate};
use crate::services::ingest_queue::IngestQueue;
use crate::services::normalizer::CoordinateNormalizer;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Scheduler and sole owner of per-track state
pub struct Processor {
    /// Tracks by id; ordered so batches list records deterministically
    pub(crate) tracks: BTreeMap<TrackId, Track>,
    pub(crate) queue: IngestQueue,
    pub(crate) normalizer: CoordinateNormalizer,
    pub(crate) classifier: Arc<dyn Classifier>,
    pub(crate) gate: EmissionGate,
    pub(crate) params_rx: watch::Receiver<Arc<Params>>,
    /// MQTT egress sender (optional)
    pub(crate) egress_sender: Option<EgressSender>,
    pub(crate) metrics: Arc<Metrics>,
    /// Process everything still queued when shutdown is requested
    pub(crate) drain_on_shutdown: bool,
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    // An overrunning tick delays the next one; ticks never burst
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl Processor {
    pub fn new(
        queue: IngestQueue,
        normalizer: CoordinateNormalizer,
        classifier: Arc<dyn Classifier>,
        params_rx: watch::Receiver<Arc<Params>>,
        metrics: Arc<Metrics>,
        egress_sender: Option<EgressSender>,
    ) -> Self {
        Self {
            tracks: BTreeMap::new(),
            queue,
            normalizer,
            classifier,
            gate: EmissionGate::new(),
            params_rx,
            egress_sender,
            metrics,
            drain_on_shutdown: true,
        }
    }

    pub fn with_drain_on_shutdown(mut self, drain: bool) -> Self {
        self.drain_on_shutdown = drain;
        self
    }

    /// Run ticks until the shutdown flag flips
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut params = self.snapshot_params();
        let mut tick_interval = ticker(params.tick_period());
        info!(
            rate_hz = %params.processing_rate_hz,
            target_frame = %self.normalizer.target_frame(),
            "processor_started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick_interval.tick() => {
                    let next = self.snapshot_params();
                    if next.processing_rate_hz != params.processing_rate_hz {
                        info!(rate_hz = %next.processing_rate_hz, "processing_rate_changed");
                        tick_interval = ticker(next.tick_period());
                    }
                    params = next;
                    self.tick(&params).await;
                }
            }
        }

        if self.drain_on_shutdown {
            let params = self.snapshot_params();
            let mut drained = 0usize;
            while let Some(event) = self.queue.dequeue_one() {
                self.process_event(event, &params).await;
                drained += 1;
            }
            info!(drained = %drained, "processor_drained");
        }
        info!(active_tracks = %self.tracks.len(), "processor_stopped");
    }

    /// Parameter set in force for the coming tick
    fn snapshot_params(&mut self) -> Arc<Params> {
        self.params_rx.borrow_and_update().clone()
    }

    /// One scheduler tick: drain up to `drain_batch_size` events
    async fn tick(&mut self, params: &Params) {
        self.metrics.set_queue_depth(self.queue.len() as u64);
        for _ in 0..params.drain_batch_size {
            let Some(event) = self.queue.dequeue_one() else {
                break;
            };
            self.process_event(event, params).await;
        }
    }

    /// Run one queued event through the whole pipeline
    pub async fn process_event(&mut self, event: PendingEvent, params: &Params) -> EmissionDecision {
        let process_start = Instant::now();
        let now = event.report.stamp;
        let smoothing = params.smoothing();
        let mut flushed: BTreeSet<TrackId> = BTreeSet::new();

        // Normalize and feed; a failed entity leaves its track untouched
        for entity in &event.report.entities {
            let Some(position) = self
                .normalizer
                .normalize(entity.track_id.as_str(), &event.report.frame_id, entity.position)
                .await
            else {
                continue;
            };

            let track = self.tracks.entry(entity.track_id.clone()).or_insert_with(|| {
                debug!(track_id = %entity.track_id, stamp = %now, "track_created");
                Track::new(entity.track_id.clone(), now)
            });

            // A sample at or past the deadline belongs to the next window
            if track.try_flush(now, smoothing).is_some() {
                Self::on_flush(&self.metrics, track);
                flushed.insert(track.id.clone());
            }
            track.feed(Sample::new(&event.reference, &position), now);
        }

        for track in self.tracks.values_mut() {
            if track.try_flush(now, smoothing).is_some() {
                Self::on_flush(&self.metrics, track);
                flushed.insert(track.id.clone());
            }
        }

        let (records, header_stamp) = self.classify_flushed(&flushed, params);

        if params.prune_buffer {
            for track in self.tracks.values_mut() {
                track.prune_history();
            }
        }

        let decision = self.gate.offer(
            records,
            header_stamp.unwrap_or(now),
            self.normalizer.target_frame(),
            params.prune_buffer,
        );
        match &decision {
            EmissionDecision::Publish(batch) => {
                self.metrics.record_batch_published();
                debug!(records = %batch.qtc.len(), stamp = %batch.header.stamp, "qtc_published");
                if let Some(ref sender) = self.egress_sender {
                    sender.send_qtc(batch.clone());
                }
            }
            EmissionDecision::Unchanged => {
                self.metrics.record_batch_suppressed();
                debug!(stamp = %now, "qtc_unchanged");
            }
            EmissionDecision::Empty => {}
        }

        self.decay_sweep(now, params.decay());

        self.metrics.set_active_tracks(self.tracks.len() as u64);
        self.metrics.record_event_processed(process_start.elapsed().as_micros() as u64);
        decision
    }

    fn on_flush(metrics: &Metrics, track: &Track) {
        metrics.record_window_flush();
        debug!(track_id = %track.id, history_len = %track.history().len(), "window_flushed");
    }

    /// Classify every track that flushed this event and holds >= 2 entries.
    /// Returns the records in track order plus the header stamp.
    fn classify_flushed(
        &self,
        flushed: &BTreeSet<TrackId>,
        params: &Params,
    ) -> (Vec<QtcRecord>, Option<Timestamp>) {
        let mut records = Vec::new();
        let mut header_stamp = None;

        for id in flushed {
            let Some(track) = self.tracks.get(id) else {
                continue;
            };
            if !track.can_classify() {
                continue;
            }

            let (reference, entity) = track.agent_histories();
            match self.classifier.classify(&reference, &entity, &params.qtc) {
                Ok(classification) => {
                    self.metrics.record_classification();
                    if let Some(record) = build_record(id, &classification, params) {
                        records.push(record);
                        header_stamp = Some(track.last_seen());
                    }
                }
                Err(e) => {
                    self.metrics.record_classifier_error();
                    warn!(track_id = %id, error = %e, "classifier_failed");
                }
            }
        }
        (records, header_stamp)
    }

    /// Forget every track silent for longer than the decay interval
    fn decay_sweep(&mut self, now: Timestamp, decay: Duration) {
        let before = self.tracks.len();
        self.tracks.retain(|id, track| {
            let keep = !track.is_decayed(now, decay);
            if !keep {
                info!(track_id = %id, last_seen = %track.last_seen(), "track_decayed");
            }
            keep
        });
        let removed = before - self.tracks.len();
        if removed > 0 {
            self.metrics.record_tracks_decayed(removed as u64);
        }
    }

    pub fn track(&self, id: &TrackId) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

/// Output record from the last transition of a classification
fn build_record(id: &TrackId, classification: &Classification, params: &Params) -> Option<QtcRecord> {
    let (state, evidence) = classification.last()?;
    let qtc_serialised = serde_json::to_string(&[state]).ok()?;
    let prob_distance_serialised = serde_json::to_string(&[evidence]).ok()?;

    let (distance_threshold, abstract_distance_threshold) = match params.qtc.threshold() {
        DistanceThreshold::Numeric(d) => (Some(d), None),
        DistanceThreshold::Abstract(i) => (None, DISTANCE_BANDS.get(i).map(|b| b.name.to_string())),
    };

    Some(QtcRecord {
        uuid: id.clone(),
        qtc_type: params.qtc.qtc_type,
        k: REFERENCE_AGENT.to_string(),
        l: ENTITY_AGENT.to_string(),
        quantisation_factor: params.qtc.quantisation_factor,
        distance_threshold,
        abstract_distance_threshold,
        smoothing_rate: params.smoothing_rate,
        validated: params.qtc.validate,
        collapsed: !params.qtc.no_collapse,
        qtc_serialised,
        prob_distance_serialised,
    })
}
