//! Services - processing pipeline and shared state
//!
//! - `ingest_queue` - FIFO between MQTT ingress and the processor
//! - `reference` - Latest reference pose, overwritten on every update
//! - `transform` - Frame transform seam and the static frame graph
//! - `normalizer` - Brings entity positions into the target frame
//! - `classifier` - QTC classification of two agent trajectories
//! - `emission` - Change gate in front of the QTC output
//! - `processor` - Tick scheduler and owner of all track state

pub mod classifier;
pub mod emission;
pub mod ingest_queue;
pub mod normalizer;
pub mod processor;
pub mod reference;
pub mod transform;

// Re-export commonly used types
pub use classifier::{Classification, Classifier, Evidence, QtcClassifier, QtcState};
pub use emission::{EmissionDecision, EmissionGate};
pub use ingest_queue::{IngestQueue, QueuePolicy};
pub use normalizer::CoordinateNormalizer;
pub use processor::Processor;
pub use reference::ReferencePointHolder;
pub use transform::{StaticFrameGraph, TransformService};
