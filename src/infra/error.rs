//! Error taxonomy for the processing core
//!
//! None of these are fatal to the processing loop:
//! - `TransformError` skips one entity for one tick
//! - `ClassifierError` skips one track for one tick
//! - `ConfigError` rejects a parameter update and keeps the previous set

use thiserror::Error;

/// Frame resolution failure for a single entity
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("frame '{0}' does not exist in the frame graph")]
    UnknownFrame(String),

    #[error("frames '{source_frame}' and '{target_frame}' are not connected")]
    Disconnected { source_frame: String, target_frame: String },

    #[error("transform lookup timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Rejected configuration or parameter update
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown qtc type '{0}'")]
    UnknownQtcType(String),

    #[error("qtc type selector {0} out of range")]
    QtcTypeOutOfRange(usize),

    #[error("unknown abstract distance band '{0}'")]
    UnknownDistanceBand(String),

    #[error("abstract distance threshold selector {0} out of range")]
    AbstractThresholdOutOfRange(usize),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: &'static str },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidValue { field, reason }
    }
}

/// Classifier could not produce a description for a history pair
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("at least 2 history entries required, got {0}")]
    InsufficientHistory(usize),

    #[error("agent histories differ in length ({a} vs {b})")]
    MismatchedLengths { a: usize, b: usize },
}
