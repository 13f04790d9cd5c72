use async_trait::async_trait;
use model::{TrackingId, TrackingSnapshot};

use crate::TrackingResult;

/// One-shot read of the delivery's stored state: route, history and last
/// known location.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, tracking_id: &TrackingId) -> TrackingResult<TrackingSnapshot>;
}
