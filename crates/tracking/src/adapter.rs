//! Normalizes the various dialects spoken on the push channel into
//! [`LiveEvent`]. The reconciler never sees anything else.

use chrono::{DateTime, Utc};
use model::{GeoPoint, LiveEvent, SubjectId};
use serde::Deserialize;
use utility::serde::timestamp;

/// Names under which the backend has been observed to publish positions.
pub const LOCATION_EVENTS: &[&str] = &[
    "location",
    "location_update",
    "locationUpdate",
    "driver_location",
    "driver:location",
    "tracking:update",
];

/// One raw message as received from the channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelMessage {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ChannelMessage {
    pub fn new<S: Into<String>>(event: S, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    pub fn is_location(&self) -> bool {
        LOCATION_EVENTS.contains(&self.event.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireId {
    Text(String),
    Number(u64),
}

impl WireId {
    fn into_subject(self) -> Option<SubjectId> {
        match self {
            Self::Text(text) => SubjectId::parse(&text),
            Self::Number(number) => Some(SubjectId::new(number.to_string())),
        }
    }
}

/// Picks the courier among the names it is published under: `subjectId`
/// over `driverId` over `courierId`. Unusable ids are skipped.
pub(crate) fn resolve_subject(
    subject_id: Option<WireId>,
    driver_id: Option<WireId>,
    courier_id: Option<WireId>,
) -> Option<SubjectId> {
    [subject_id, driver_id, courier_id]
        .into_iter()
        .flatten()
        .find_map(WireId::into_subject)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireCoordinates {
    /// GeoJSON position, longitude first.
    LngLat([f64; 2]),
    Named {
        #[serde(alias = "latitude")]
        lat: f64,
        #[serde(alias = "longitude", alias = "lon")]
        lng: f64,
    },
}

impl WireCoordinates {
    fn point(&self) -> GeoPoint {
        match self {
            Self::LngLat([lng, lat]) => GeoPoint::new(*lat, *lng),
            Self::Named { lat, lng } => GeoPoint::new(*lat, *lng),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireLocation {
    GeoJson { coordinates: WireCoordinates },
    Plain(WireCoordinates),
}

impl WireLocation {
    fn point(&self) -> GeoPoint {
        match self {
            Self::GeoJson { coordinates } => coordinates.point(),
            Self::Plain(coordinates) => coordinates.point(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(default)]
    subject_id: Option<WireId>,
    #[serde(default)]
    driver_id: Option<WireId>,
    #[serde(default)]
    courier_id: Option<WireId>,
    #[serde(default)]
    coordinates: Option<WireCoordinates>,
    #[serde(default)]
    location: Option<WireLocation>,
    #[serde(default, alias = "lat")]
    latitude: Option<f64>,
    #[serde(default, alias = "lng", alias = "lon")]
    longitude: Option<f64>,
    #[serde(
        default,
        alias = "timestamp",
        alias = "recordedAt",
        alias = "updatedAt",
        deserialize_with = "timestamp::deserialize_option"
    )]
    at: Option<DateTime<Utc>>,
    #[serde(default, alias = "speed")]
    speed_kph: Option<f64>,
    #[serde(default, alias = "heading", alias = "bearing")]
    heading_deg: Option<f64>,
}

impl WireEvent {
    fn point(&self) -> Option<GeoPoint> {
        if let Some(coordinates) = &self.coordinates {
            return Some(coordinates.point());
        }
        if let Some(location) = &self.location {
            return Some(location.point());
        }
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }
}

/// Some channel dialects wrap the position in a `data` envelope.
fn unwrap_envelope(payload: &serde_json::Value) -> &serde_json::Value {
    match payload.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => payload,
    }
}

/// Converts a channel message into a live event. Messages that are not
/// position updates, or whose payload has no readable position, yield `None`.
/// Coordinates are passed through unvalidated; range checks belong to the
/// reconciler.
pub fn normalize(message: &ChannelMessage) -> Option<LiveEvent> {
    if !message.is_location() {
        log::trace!("ignoring channel event `{}`", message.event);
        return None;
    }
    let payload = unwrap_envelope(&message.payload);
    let wire = match WireEvent::deserialize(payload) {
        Ok(wire) => wire,
        Err(why) => {
            log::debug!("unreadable `{}` payload: {}", message.event, why);
            return None;
        }
    };
    let point = match wire.point() {
        Some(point) => point,
        None => {
            log::debug!("`{}` payload carries no position", message.event);
            return None;
        }
    };
    Some(LiveEvent {
        subject_id: resolve_subject(wire.subject_id, wire.driver_id, wire.courier_id),
        point,
        at: wire.at,
        speed_kph: wire.speed_kph.filter(|speed| speed.is_finite()),
        heading_deg: wire.heading_deg.filter(|heading| heading.is_finite()),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn geojson_coordinates() {
        let message = ChannelMessage::new(
            "location_update",
            json!({
                "subjectId": "drv-1",
                "coordinates": [13.405, 52.52],
                "at": "2024-05-01T10:00:00Z",
                "speedKph": 31.5,
                "headingDeg": 270
            }),
        );
        let event = normalize(&message).unwrap();
        assert_eq!(event.point, GeoPoint::new(52.52, 13.405));
        assert_eq!(event.subject_id, SubjectId::parse("drv-1"));
        assert_eq!(event.speed_kph, Some(31.5));
        assert_eq!(event.heading_deg, Some(270.0));
        assert!(event.at.is_some());
    }

    #[test]
    fn nested_location_dialect() {
        let message = ChannelMessage::new(
            "driver_location",
            json!({
                "driverId": 17,
                "location": { "type": "Point", "coordinates": [13.405, 52.52] },
                "timestamp": 1714557600000i64,
                "speed": 12,
                "bearing": 45
            }),
        );
        let event = normalize(&message).unwrap();
        assert_eq!(event.point, GeoPoint::new(52.52, 13.405));
        assert_eq!(event.subject_id, SubjectId::parse("17"));
        assert_eq!(event.speed_kph, Some(12.0));
        assert_eq!(event.heading_deg, Some(45.0));
    }

    #[test]
    fn subject_id_wins_over_driver_id() {
        let message = ChannelMessage::new(
            "location_update",
            json!({
                "subjectId": "drv-1",
                "driverId": "drv-legacy",
                "courierId": 9,
                "coordinates": [13.405, 52.52]
            }),
        );
        assert_eq!(normalize(&message).unwrap().subject_id, SubjectId::parse("drv-1"));

        let message = ChannelMessage::new(
            "location_update",
            json!({ "subjectId": " ", "courierId": 9, "coordinates": [13.405, 52.52] }),
        );
        assert_eq!(normalize(&message).unwrap().subject_id, SubjectId::parse("9"));
    }

    #[test]
    fn flat_and_enveloped_dialects() {
        let flat = ChannelMessage::new("location", json!({ "lat": 1.5, "lng": 2.5 }));
        assert_eq!(normalize(&flat).unwrap().point, GeoPoint::new(1.5, 2.5));

        let enveloped = ChannelMessage::new(
            "tracking:update",
            json!({ "data": { "location": { "latitude": 1.5, "longitude": 2.5 } } }),
        );
        let event = normalize(&enveloped).unwrap();
        assert_eq!(event.point, GeoPoint::new(1.5, 2.5));
        assert_eq!(event.subject_id, None);
        assert_eq!(event.at, None);
    }

    #[test]
    fn ignores_other_events_and_shapeless_payloads() {
        assert_eq!(normalize(&ChannelMessage::new("ping", json!({}))), None);
        assert_eq!(
            normalize(&ChannelMessage::new("location", json!({ "coordinates": ["a", "b"] }))),
            None
        );
        assert_eq!(normalize(&ChannelMessage::new("location", json!({ "speed": 3 }))), None);
    }
}
