//! Domain models - observation, track and QTC output types
//!
//! - `types` - ids, stream timestamps, positions and wire messages
//! - `track` - smoothing window and per-track history
//! - `qtc` - QTC variants, distance bands and the published record

pub mod qtc;
pub mod track;
pub mod types;

// Re-export commonly used types at module level
pub use qtc::{QtcArray, QtcParameters, QtcRecord, QtcType};
pub use track::Track;
pub use types::{EntitiesReport, PendingEvent, Position, Timestamp, TrackId};
