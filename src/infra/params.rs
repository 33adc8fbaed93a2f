//! Live-updatable processing parameters
//!
//! Updates are partial JSON documents. Each update is merged onto the
//! current set, validated as a whole and swapped in atomically through a
//! `watch` channel. The processor snapshots the set once per tick, so a
//! tick never observes a half-applied update.

use crate::domain::qtc::{band_index, QtcParameters, QtcType};
use crate::infra::error::ConfigError;
use crate::infra::metrics::Metrics;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Complete parameter set in force for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub qtc: QtcParameters,
    /// Smoothing window length in seconds
    pub smoothing_rate: f64,
    /// Silence interval after which a track is forgotten, in seconds
    pub decay_time: f64,
    pub processing_rate_hz: f64,
    pub prune_buffer: bool,
    /// Queued events processed per tick
    pub drain_batch_size: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            qtc: QtcParameters::default(),
            smoothing_rate: 0.3,
            decay_time: 120.0,
            processing_rate_hz: 30.0,
            prune_buffer: false,
            drain_batch_size: 1,
        }
    }
}

impl Params {
    pub fn smoothing(&self) -> Duration {
        Duration::from_secs_f64(self.smoothing_rate)
    }

    pub fn decay(&self) -> Duration {
        Duration::from_secs_f64(self.decay_time)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.processing_rate_hz)
    }

    /// Merge an update onto a copy of this set and validate the result
    pub fn apply(&self, update: &ParamsUpdate) -> Result<Params, ConfigError> {
        let mut next = self.clone();

        if let Some(ref selector) = update.qtc_type {
            next.qtc.qtc_type = match selector {
                Selector::Index(i) => QtcType::from_index(*i)?,
                Selector::Name(name) => name.parse()?,
            };
        }
        if let Some(q) = update.quantisation_factor {
            next.qtc.quantisation_factor = q;
        }
        if let Some(d) = update.distance_threshold {
            next.qtc.distance_threshold = d;
        }
        if let Some(ref selector) = update.abstract_distance_threshold {
            next.qtc.abstract_distance_threshold = match selector {
                Selector::Index(i) => *i,
                Selector::Name(name) => band_index(name)?,
            };
        }
        if let Some(v) = update.validate {
            next.qtc.validate = v;
        }
        if let Some(v) = update.no_collapse {
            next.qtc.no_collapse = v;
        }
        if let Some(s) = update.smoothing_rate {
            next.smoothing_rate = s;
        }
        if let Some(d) = update.decay_time {
            next.decay_time = d;
        }
        if let Some(r) = update.processing_rate {
            next.processing_rate_hz = r;
        }
        if let Some(p) = update.prune_buffer {
            next.prune_buffer = p;
        }
        if let Some(n) = update.drain_batch_size {
            next.drain_batch_size = n;
        }

        // Pruning discards the multi-sample history these need
        if next.prune_buffer {
            next.qtc.validate = false;
            next.qtc.no_collapse = false;
        }

        next.check()?;
        Ok(next)
    }

    /// Reject inconsistent sets before they reach the processor.
    /// Every interval must be representable as a `Duration`.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.qtc.validate_values()?;
        if Duration::try_from_secs_f64(self.smoothing_rate).is_err() {
            return Err(ConfigError::invalid("smoothing_rate", "must be a finite duration >= 0"));
        }
        if Duration::try_from_secs_f64(self.decay_time).is_err() {
            return Err(ConfigError::invalid("decay_time", "must be a finite duration >= 0"));
        }
        // The tick interval needs a finite, non-zero period
        let period = Duration::try_from_secs_f64(1.0 / self.processing_rate_hz);
        if !self.processing_rate_hz.is_finite()
            || self.processing_rate_hz <= 0.0
            || !matches!(period, Ok(p) if !p.is_zero())
        {
            return Err(ConfigError::invalid("processing_rate", "must be > 0 with a finite period"));
        }
        if self.drain_batch_size == 0 {
            return Err(ConfigError::invalid("drain_batch_size", "must be >= 1"));
        }
        Ok(())
    }
}

/// Index or name selector, accepted for model and band choices
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Selector {
    Index(usize),
    Name(String),
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamsUpdate {
    pub qtc_type: Option<Selector>,
    pub quantisation_factor: Option<f64>,
    pub distance_threshold: Option<f64>,
    pub abstract_distance_threshold: Option<Selector>,
    pub validate: Option<bool>,
    pub no_collapse: Option<bool>,
    pub smoothing_rate: Option<f64>,
    pub decay_time: Option<f64>,
    pub processing_rate: Option<f64>,
    pub prune_buffer: Option<bool>,
    pub drain_batch_size: Option<usize>,
}

/// Shared writer side of the parameter channel
#[derive(Clone)]
pub struct ParamsHandle {
    tx: Arc<watch::Sender<Arc<Params>>>,
    metrics: Arc<Metrics>,
}

impl ParamsHandle {
    /// Create the handle and the receiver the processor snapshots from
    pub fn new(initial: Params, metrics: Arc<Metrics>) -> (Self, watch::Receiver<Arc<Params>>) {
        let (tx, rx) = watch::channel(Arc::new(initial));
        (Self { tx: Arc::new(tx), metrics }, rx)
    }

    /// Validate and atomically swap in an update.
    /// On rejection the previous set stays in force.
    pub fn apply(&self, update: &ParamsUpdate) -> Result<(), ConfigError> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|current| match current.apply(update) {
            Ok(next) => {
                let changed = next != **current;
                *current = Arc::new(next);
                changed
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });

        match outcome {
            Ok(()) => {
                self.metrics.record_params_applied();
                let current = self.current();
                info!(
                    qtc_type = %current.qtc.qtc_type,
                    quantisation_factor = %current.qtc.quantisation_factor,
                    smoothing_rate = %current.smoothing_rate,
                    decay_time = %current.decay_time,
                    prune_buffer = %current.prune_buffer,
                    "params_applied"
                );
                Ok(())
            }
            Err(e) => {
                self.metrics.record_params_rejected();
                warn!(error = %e, "params_rejected");
                Err(e)
            }
        }
    }

    pub fn current(&self) -> Arc<Params> {
        self.tx.borrow().clone()
    }
}
