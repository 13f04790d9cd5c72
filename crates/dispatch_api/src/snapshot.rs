//! Delivery snapshots as served by the dashboard backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    DeliverySnapshot, GeoPoint, LastKnownLocation, Place, RouteSnapshot, TimedPoint, TrackingId,
    TrackingSnapshot,
};
use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use tracking::{snapshot::SnapshotSource, TrackingError, TrackingResult};
use utility::serde::timestamp;

use crate::client::DispatchApiClient;

/// Reads a list, skipping entries that do not parse instead of failing.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(why) => {
                log::debug!("dropping unreadable entry: {}", why);
                None
            }
        })
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireLocation {
    /// GeoJSON point, longitude first.
    GeoJson { coordinates: [f64; 2] },
    Named {
        #[serde(alias = "latitude")]
        lat: f64,
        #[serde(alias = "longitude", alias = "lon")]
        lng: f64,
    },
}

impl WireLocation {
    /// The position, unvalidated.
    pub fn point(&self) -> GeoPoint {
        match self {
            Self::GeoJson {
                coordinates: [lng, lat],
            } => GeoPoint::new(*lat, *lng),
            Self::Named { lat, lng } => GeoPoint::new(*lat, *lng),
        }
    }

    pub fn valid_point(&self) -> Option<GeoPoint> {
        Some(self.point()).filter(GeoPoint::is_valid)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePlace {
    pub location: WireLocation,
    #[serde(default, alias = "description", alias = "name")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLastKnownLocation {
    #[serde(alias = "coordinates")]
    pub location: WireLocation,
    #[serde(
        default,
        alias = "at",
        alias = "timestamp",
        deserialize_with = "timestamp::deserialize_option"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireHistoryPoint {
    #[serde(flatten)]
    pub location: WireLocation,
    #[serde(
        default,
        alias = "timestamp",
        alias = "recordedAt",
        deserialize_with = "timestamp::deserialize_option"
    )]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDelivery {
    pub start: WirePlace,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub stops: Vec<WirePlace>,
    #[serde(default, alias = "encodedPolyline")]
    pub polyline: Option<String>,
    #[serde(default)]
    pub last_known_location: Option<WireLastKnownLocation>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub location_history: Vec<WireHistoryPoint>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WireDelivery {
    /// Converts into the domain snapshot. Stops, history pings and the last
    /// known location with unusable coordinates are dropped; pings without a
    /// timestamp can not be ordered and are dropped as well.
    pub fn into_snapshot(self, id: TrackingId, fetched_at: DateTime<Utc>) -> TrackingSnapshot {
        let stops = self
            .stops
            .into_iter()
            .filter_map(|stop| {
                let location = stop.location.valid_point();
                if location.is_none() {
                    log::debug!("dropping stop with invalid location {:?}", stop.location);
                }
                Some(Place::new(location?, stop.address))
            })
            .collect();
        let history = self
            .location_history
            .into_iter()
            .filter_map(|ping| Some(TimedPoint::new(ping.location.valid_point()?, ping.at?)))
            .collect();
        let last_known_location = self.last_known_location.and_then(|known| {
            Some(LastKnownLocation {
                location: known.location.valid_point()?,
                updated_at: known.updated_at,
            })
        });

        TrackingSnapshot {
            id,
            route: RouteSnapshot {
                // consumers skip an invalid pickup
                start: Place::new(self.start.location.point(), self.start.address),
                stops,
                encoded_polyline: self.polyline,
                last_updated: self.updated_at,
            },
            delivery: DeliverySnapshot {
                last_known_location,
                history,
            },
            fetched_at,
        }
    }
}

pub struct HttpSnapshotSource {
    client: Arc<DispatchApiClient>,
}

impl HttpSnapshotSource {
    pub fn new(client: Arc<DispatchApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, tracking_id: &TrackingId) -> TrackingResult<TrackingSnapshot> {
        let endpoint = format!("deliveries/{}", tracking_id);
        let delivery: WireDelivery = self
            .client
            .json(Method::GET, &endpoint)
            .await?
            .ok_or_else(|| TrackingError::data_shape(format!("empty body from {}", endpoint)))?;
        Ok(delivery.into_snapshot(tracking_id.clone(), Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::Response;

    fn body() -> serde_json::Value {
        json!({
            "data": {
                "start": {
                    "location": { "type": "Point", "coordinates": [13.40, 52.50] },
                    "address": "Depot"
                },
                "stops": [
                    { "location": { "type": "Point", "coordinates": [13.41, 52.52] } },
                    { "location": { "type": "Point", "coordinates": [200.0, 52.52] } },
                    { "location": { "lat": 52.53, "lng": 13.45 }, "name": "Customer" }
                ],
                "polyline": "_p~iF~ps|U_ulLnnqC_mqNvxq`@",
                "lastKnownLocation": {
                    "location": { "coordinates": [13.405, 52.51] },
                    "updatedAt": "2024-05-01T12:00:00+02:00"
                },
                "locationHistory": [
                    { "coordinates": [13.402, 52.505], "timestamp": 1714557600000i64 },
                    { "lat": 52.51, "lng": 13.405, "at": "2024-05-01T10:01:00Z" },
                    { "lat": "north", "lng": 13.0, "at": "2024-05-01T10:02:00Z" },
                    { "lat": 52.6, "lng": 13.5 }
                ],
                "updatedAt": "2024-05-01T09:00:00Z"
            }
        })
    }

    #[test]
    fn converts_and_drops_unusable_points() {
        let response: Response<WireDelivery> = serde_json::from_value(body()).unwrap_or_else(|_| {
            panic!("history entries with garbage coordinates must not fail the whole body")
        });
        let fetched_at = Utc::now();
        let snapshot = response
            .into_inner()
            .into_snapshot(TrackingId::new("42".to_owned()), fetched_at);

        assert_eq!(snapshot.route.start.location, GeoPoint::new(52.50, 13.40));
        assert_eq!(snapshot.route.start.description.as_deref(), Some("Depot"));
        assert_eq!(snapshot.route.stops.len(), 2);
        assert_eq!(snapshot.route.stops[1].description.as_deref(), Some("Customer"));
        assert!(snapshot.route.polyline().is_some());

        let history = &snapshot.delivery.history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].point, GeoPoint::new(52.505, 13.402));
        assert_eq!(history[0].at, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());

        let known = snapshot.delivery.last_known_location.unwrap();
        assert_eq!(known.location, GeoPoint::new(52.51, 13.405));
        assert_eq!(known.updated_at, Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()));
        assert_eq!(snapshot.fetched_at, fetched_at);
    }

    #[test]
    fn bare_bodies_are_accepted() {
        let bare = body()["data"].clone();
        let response: Response<WireDelivery> = serde_json::from_value(bare).unwrap();
        assert_eq!(response.into_inner().stops.len(), 3);
    }
}
