use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{GeoPoint, RouteSnapshot, TimedPoint};

/// A delivery (or route) that can be opened in a detail view and tracked.
#[derive(Debug, Clone, JsonSchema)]
pub struct Delivery;

impl HasId for Delivery {
    type IdType = String;
}

pub type TrackingId = Id<Delivery>;

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastKnownLocation {
    pub location: GeoPoint,
    pub updated_at: Option<DateTime<Utc>>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySnapshot {
    pub last_known_location: Option<LastKnownLocation>,
    /// Historical pings as delivered by the backend, in no guaranteed order.
    pub history: Vec<TimedPoint>,
}

/// Everything one snapshot request returns for a tracking id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub id: TrackingId,
    pub route: RouteSnapshot,
    pub delivery: DeliverySnapshot,
    pub fetched_at: DateTime<Utc>,
}

impl TrackingSnapshot {
    /// The newest of the route's and the last known location's timestamps.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        let location_updated = self
            .delivery
            .last_known_location
            .as_ref()
            .and_then(|location| location.updated_at);
        match (self.route.last_updated, location_updated) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}
