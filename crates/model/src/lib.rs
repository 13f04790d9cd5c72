use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
pub use serde_with;

pub mod delivery;
pub mod geo_point;
pub mod live;
pub mod route;

pub use delivery::{Delivery, DeliverySnapshot, LastKnownLocation, TrackingId, TrackingSnapshot};
pub use geo_point::{GeoPoint, Place, TimedPoint};
pub use live::{Courier, Kinematics, LiveEvent, LivePathState, SubjectId};
pub use route::RouteSnapshot;

/// Where a rendered path came from, in the order of preference used when
/// several candidates are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum PathSource {
    SnappedHistory,
    History,
    EncodedPolyline,
    RoutedAnchors,
    StraightLine,
    None,
}

impl PathSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::StraightLine | Self::None)
    }
}
