//! Per-track state: smoothing window, smoothed history and decay bookkeeping

use crate::domain::types::{Point2, Sample, Timestamp, TrackId};
use std::time::Duration;

/// Raw samples accumulated since the window opened
#[derive(Debug, Clone)]
pub struct SmoothingWindow {
    pub start_time: Timestamp,
    pub samples: Vec<Sample>,
    /// Timestamp of the last sample fed into this window
    pub last_stamp: Timestamp,
}

impl SmoothingWindow {
    fn open(sample: Sample, stamp: Timestamp) -> Self {
        Self { start_time: stamp, samples: vec![sample], last_stamp: stamp }
    }

    /// Deadline reached: `start_time + duration <= now`
    #[inline]
    pub fn is_due(&self, now: Timestamp, duration: Duration) -> bool {
        self.start_time.secs() + duration.as_secs_f64() <= now.secs()
    }

    /// Column-wise arithmetic mean of the buffered samples
    pub fn mean(&self) -> Sample {
        let mut sum = [0.0f64; 4];
        for sample in &self.samples {
            for (acc, v) in sum.iter_mut().zip(sample.0.iter()) {
                *acc += v;
            }
        }
        let n = self.samples.len().max(1) as f64;
        Sample(sum.map(|s| s / n))
    }
}

/// One tracked entity's state for its visible lifetime
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    window: Option<SmoothingWindow>,
    history: Vec<Sample>,
    last_seen: Timestamp,
}

impl Track {
    pub fn new(id: TrackId, stamp: Timestamp) -> Self {
        Self { id, window: None, history: Vec::new(), last_seen: stamp }
    }

    /// Append a raw sample, opening a window if none is open
    pub fn feed(&mut self, sample: Sample, stamp: Timestamp) {
        match self.window.as_mut() {
            Some(window) => {
                window.samples.push(sample);
                window.last_stamp = window.last_stamp.max(stamp);
            }
            None => self.window = Some(SmoothingWindow::open(sample, stamp)),
        }
        // Out-of-order stamps never move last_seen backwards
        self.last_seen = self.last_seen.max(stamp);
    }

    /// Whether the open window (if any) has reached its deadline
    #[inline]
    pub fn window_due(&self, now: Timestamp, duration: Duration) -> bool {
        self.window.as_ref().is_some_and(|w| w.is_due(now, duration))
    }

    /// Close a due window, appending its mean to the history.
    ///
    /// Returns the appended entry, or `None` when no window is open or the
    /// deadline has not been reached yet.
    pub fn try_flush(&mut self, now: Timestamp, duration: Duration) -> Option<Sample> {
        if !self.window_due(now, duration) {
            return None;
        }
        let window = self.window.take()?;
        let smoothed = window.mean();
        self.history.push(smoothed);
        self.last_seen = self.last_seen.max(window.last_stamp);
        Some(smoothed)
    }

    /// Keep only the most recent history entry
    pub fn prune_history(&mut self) {
        let len = self.history.len();
        if len > 1 {
            self.history.drain(..len - 1);
        }
    }

    /// Silence check: `last_seen + decay < now`
    #[inline]
    pub fn is_decayed(&self, now: Timestamp, decay: Duration) -> bool {
        self.last_seen.secs() + decay.as_secs_f64() < now.secs()
    }

    /// A single entry cannot express a transition
    #[inline]
    pub fn can_classify(&self) -> bool {
        self.history.len() >= 2
    }

    pub fn history(&self) -> &[Sample] {
        &self.history
    }

    pub fn window(&self) -> Option<&SmoothingWindow> {
        self.window.as_ref()
    }

    pub fn last_seen(&self) -> Timestamp {
        self.last_seen
    }

    /// Split the history into (reference, entity) point sequences
    pub fn agent_histories(&self) -> (Vec<Point2>, Vec<Point2>) {
        self.history.iter().map(|s| (s.reference(), s.entity())).unzip()
    }
}
