//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for reports, reference poses and parameter updates
//! - `mqtt_egress` - MQTT publisher for QTC batches and metrics
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress_channel;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;

// Re-export commonly used types
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender, MetricsPayload};
pub use mqtt::{start_mqtt_client, IngressError, IngressRouter, Routed};
pub use mqtt_egress::MqttPublisher;
