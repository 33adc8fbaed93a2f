//! Resolves entity positions into the target frame

use crate::domain::types::Position;
use crate::infra::error::TransformError;
use crate::infra::metrics::Metrics;
use crate::services::transform::{canonical_frame, TransformService};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

pub struct CoordinateNormalizer {
    service: Arc<dyn TransformService>,
    target_frame: String,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl CoordinateNormalizer {
    pub fn new(
        service: Arc<dyn TransformService>,
        target_frame: impl Into<String>,
        timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { service, target_frame: target_frame.into(), timeout, metrics }
    }

    pub fn target_frame(&self) -> &str {
        &self.target_frame
    }

    /// Position in the target frame, or `None` when the entity has to be
    /// skipped for this tick. Failures are logged and counted, never raised.
    pub async fn normalize(
        &self,
        track_id: &str,
        source_frame: &str,
        position: Position,
    ) -> Option<Position> {
        match self.resolve(source_frame, position).await {
            Ok(p) => Some(p),
            Err(e) => {
                self.metrics.record_transform_failure();
                warn!(
                    track_id = %track_id,
                    source_frame = %source_frame,
                    target_frame = %self.target_frame,
                    error = %e,
                    "transform_failed"
                );
                None
            }
        }
    }

    async fn resolve(&self, source_frame: &str, position: Position) -> Result<Position, TransformError> {
        if canonical_frame(source_frame) == canonical_frame(&self.target_frame) {
            return Ok(position);
        }
        let lookup = self.service.transform_position(source_frame, &self.target_frame, position);
        match timeout(self.timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(TransformError::Timeout { timeout_ms: self.timeout.as_millis() as u64 }),
        }
    }
}
