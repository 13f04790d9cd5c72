use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{GeoPoint, Place};

/// The planned route of a delivery as the backend describes it. A refetch
/// replaces the whole value; fields are never merged.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteSnapshot {
    pub start: Place,
    pub stops: Vec<Place>,
    pub encoded_polyline: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl RouteSnapshot {
    /// Pickup followed by every stop, in visiting order.
    pub fn anchors(&self) -> Vec<GeoPoint> {
        std::iter::once(&self.start)
            .chain(self.stops.iter())
            .map(|place| place.location)
            .collect()
    }

    /// The polyline if it carries any data.
    pub fn polyline(&self) -> Option<&str> {
        self.encoded_polyline
            .as_deref()
            .map(str::trim)
            .filter(|encoded| !encoded.is_empty())
    }
}
