//! qtc-online library
//!
//! Domain types, the processing pipeline and its MQTT/Prometheus surfaces,
//! shared by the daemon, the simulator and the integration tests.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
