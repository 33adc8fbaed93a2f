//! Infrastructure - configuration, live parameters, errors and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `params` - Live-updatable processing parameters (watch channel)
//! - `error` - Error taxonomy for the processing core
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod error;
pub mod metrics;
pub mod params;

// Re-export commonly used types
pub use config::{Config, OverflowPolicy};
pub use error::{ClassifierError, ConfigError, TransformError};
pub use metrics::Metrics;
pub use params::{Params, ParamsHandle, ParamsUpdate};
