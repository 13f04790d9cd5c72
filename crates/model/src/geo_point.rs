use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::geo;

/// A WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Returns `None` for non-finite or out-of-range coordinates.
    pub fn checked(lat: f64, lng: f64) -> Option<Self> {
        geo::is_valid_coordinate(lat, lng).then_some(Self { lat, lng })
    }

    /// GeoJSON order, `[lng, lat]`.
    pub fn from_lng_lat(position: [f64; 2]) -> Option<Self> {
        Self::checked(position[1], position[0])
    }

    pub fn is_valid(&self) -> bool {
        geo::is_valid_coordinate(self.lat, self.lng)
    }

    /// True if both axes differ by at most `epsilon` degrees.
    pub fn is_near(&self, other: &GeoPoint, epsilon: f64) -> bool {
        (self.lat - other.lat).abs() <= epsilon && (self.lng - other.lng).abs() <= epsilon
    }

    /// Lossless textual form, used as a key when nothing better is available.
    pub fn key(&self) -> String {
        format!("{},{}", self.lat, self.lng)
    }

    /// Key at a fixed precision, so that nearly identical coordinates share it.
    pub fn rounded_key(&self, decimals: usize) -> String {
        format!(
            "{},{}",
            geo::format_fixed(self.lat, decimals),
            geo::format_fixed(self.lng, decimals)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimedPoint {
    #[serde(flatten)]
    pub point: GeoPoint,
    pub at: DateTime<Utc>,
}

impl TimedPoint {
    pub fn new(point: GeoPoint, at: DateTime<Utc>) -> Self {
        Self { point, at }
    }
}

/// A coordinate with an optional human readable description, e.g. the pickup
/// address or a drop-off stop.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub location: GeoPoint,
    pub description: Option<String>,
}

impl Place {
    pub fn new(location: GeoPoint, description: Option<String>) -> Self {
        Self {
            location,
            description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geojson_order_is_lng_lat() {
        let point = GeoPoint::from_lng_lat([13.4, 52.5]).unwrap();
        assert_eq!(point, GeoPoint::new(52.5, 13.4));
        assert!(GeoPoint::from_lng_lat([52.5, 113.4]).is_none());
    }

    #[test]
    fn nearness_is_per_axis() {
        let a = GeoPoint::new(10.0, 10.0);
        assert!(a.is_near(&GeoPoint::new(10.000005, 9.999995), 1e-5));
        assert!(!a.is_near(&GeoPoint::new(10.0, 10.0001), 1e-5));
    }

    #[test]
    fn rounded_keys_collapse_jitter() {
        let a = GeoPoint::new(1.0000001, 2.0);
        let b = GeoPoint::new(1.0000002, 2.0);
        assert_ne!(a.key(), b.key());
        assert_eq!(a.rounded_key(5), b.rounded_key(5));
    }
}
