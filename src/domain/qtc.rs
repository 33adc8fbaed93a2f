//! Qualitative Trajectory Calculus model selection and output records

use crate::domain::types::{Timestamp, TrackId};
use crate::infra::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Agent label for the reference point (first agent)
pub const REFERENCE_AGENT: &str = "Robot";
/// Agent label for the tracked entity (second agent)
pub const ENTITY_AGENT: &str = "Human";

/// Qualitative model used by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QtcType {
    Qtcb,
    Qtcc,
    Qtcbc,
    Qtcbcs,
    QtcbcsArgprobd,
}

impl QtcType {
    /// Selector order for index-based configuration
    pub const ALL: [QtcType; 5] =
        [QtcType::Qtcb, QtcType::Qtcc, QtcType::Qtcbc, QtcType::Qtcbcs, QtcType::QtcbcsArgprobd];

    pub fn as_str(&self) -> &'static str {
        match self {
            QtcType::Qtcb => "qtcb",
            QtcType::Qtcc => "qtcc",
            QtcType::Qtcbc => "qtcbc",
            QtcType::Qtcbcs => "qtcbcs",
            QtcType::QtcbcsArgprobd => "qtcbcs_argprobd",
        }
    }

    pub fn from_index(index: usize) -> Result<Self, ConfigError> {
        Self::ALL.get(index).copied().ok_or(ConfigError::QtcTypeOutOfRange(index))
    }

    /// Whether the model switches between QTC_B and QTC_C by distance
    #[inline]
    pub fn is_distance_switched(&self) -> bool {
        matches!(self, QtcType::Qtcbc | QtcType::Qtcbcs | QtcType::QtcbcsArgprobd)
    }

    /// Whether the model uses an abstract distance band instead of a number
    #[inline]
    pub fn uses_abstract_distance(&self) -> bool {
        matches!(self, QtcType::QtcbcsArgprobd)
    }
}

impl fmt::Display for QtcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QtcType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownQtcType(s.to_string()))
    }
}

/// Named proxemic distance band with its midpoint and spread (meters)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceBand {
    pub name: &'static str,
    pub midpoint: f64,
    pub spread: f64,
}

/// Intimate, personal, social, public and undefined space, nearest first.
/// Midpoint is the band centre, spread a quarter of its width.
pub const DISTANCE_BANDS: [DistanceBand; 5] = [
    DistanceBand { name: "int", midpoint: 0.23, spread: 0.115 },
    DistanceBand { name: "per", midpoint: 0.84, spread: 0.19 },
    DistanceBand { name: "soc", midpoint: 2.46, spread: 0.62 },
    DistanceBand { name: "pub", midpoint: 4.85, spread: 0.575 },
    DistanceBand { name: "und", midpoint: 8.0, spread: 1.0 },
];

/// Resolve a band by name
pub fn band_index(name: &str) -> Result<usize, ConfigError> {
    DISTANCE_BANDS
        .iter()
        .position(|b| b.name == name)
        .ok_or_else(|| ConfigError::UnknownDistanceBand(name.to_string()))
}

/// Effective distance threshold; never both at once
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceThreshold {
    Numeric(f64),
    Abstract(usize),
}

/// Parameter set handed verbatim to the classifier
#[derive(Debug, Clone, PartialEq)]
pub struct QtcParameters {
    pub qtc_type: QtcType,
    pub quantisation_factor: f64,
    pub distance_threshold: f64,
    /// Index into [`DISTANCE_BANDS`]
    pub abstract_distance_threshold: usize,
    pub validate: bool,
    pub no_collapse: bool,
}

impl Default for QtcParameters {
    fn default() -> Self {
        Self {
            qtc_type: QtcType::Qtcbcs,
            quantisation_factor: 0.01,
            distance_threshold: 1.22,
            abstract_distance_threshold: 2,
            validate: true,
            no_collapse: false,
        }
    }
}

impl QtcParameters {
    pub fn threshold(&self) -> DistanceThreshold {
        if self.qtc_type.uses_abstract_distance() {
            DistanceThreshold::Abstract(self.abstract_distance_threshold)
        } else {
            DistanceThreshold::Numeric(self.distance_threshold)
        }
    }

    pub fn validate_values(&self) -> Result<(), ConfigError> {
        if !self.quantisation_factor.is_finite() || self.quantisation_factor < 0.0 {
            return Err(ConfigError::invalid("quantisation_factor", "must be finite and >= 0"));
        }
        if !self.distance_threshold.is_finite() || self.distance_threshold < 0.0 {
            return Err(ConfigError::invalid("distance_threshold", "must be finite and >= 0"));
        }
        if self.abstract_distance_threshold >= DISTANCE_BANDS.len() {
            return Err(ConfigError::AbstractThresholdOutOfRange(self.abstract_distance_threshold));
        }
        Ok(())
    }
}

/// One qualitative result for one track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QtcRecord {
    pub uuid: TrackId,
    pub qtc_type: QtcType,
    pub k: String,
    pub l: String,
    pub quantisation_factor: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_distance_threshold: Option<String>,
    pub smoothing_rate: f64,
    pub validated: bool,
    pub collapsed: bool,
    pub qtc_serialised: String,
    pub prob_distance_serialised: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QtcHeader {
    pub stamp: Timestamp,
    pub frame_id: String,
}

/// Published batch of per-track records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QtcArray {
    pub header: QtcHeader,
    pub qtc: Vec<QtcRecord>,
}
