use std::sync::Arc;

use async_trait::async_trait;
use model::GeoPoint;
use serde::Deserialize;
use tracking::{
    directions::{DirectionsRequest, DirectionsService},
    polyline, TrackingError, TrackingResult,
};

use crate::{check_status, client::GoogleMapsClient};

const COORDINATE_DECIMALS: usize = 6;

#[derive(Debug, Deserialize)]
struct OverviewPolyline {
    points: String,
}

#[derive(Debug, Deserialize)]
struct Route {
    overview_polyline: OverviewPolyline,
}

#[derive(Debug, Deserialize)]
pub struct DirectionsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

impl DirectionsResponse {
    /// Decoded overview path of the first route. Empty if nothing was found.
    pub fn path(&self) -> TrackingResult<Vec<GeoPoint>> {
        if !check_status(&self.status, self.error_message.as_deref())? {
            return Ok(vec![]);
        }
        let route = match self.routes.first() {
            Some(route) => route,
            None => return Ok(vec![]),
        };
        polyline::try_decode(&route.overview_polyline.points)
            .map_err(|why| TrackingError::data_shape(format!("overview polyline: {}", why)))
    }
}

fn coordinate(point: &GeoPoint) -> String {
    point.rounded_key(COORDINATE_DECIMALS)
}

/// Driving directions through the Directions web service. Intermediate
/// points are passed as `via:` waypoints so they shape the route without
/// becoming stops.
pub struct GoogleDirections {
    client: Arc<GoogleMapsClient>,
}

impl GoogleDirections {
    pub fn new(client: Arc<GoogleMapsClient>) -> Self {
        Self { client }
    }

    pub fn query(request: &DirectionsRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("origin", coordinate(&request.origin)),
            ("destination", coordinate(&request.destination)),
            ("mode", "driving".to_owned()),
        ];
        if !request.waypoints.is_empty() {
            let waypoints = request
                .waypoints
                .iter()
                .map(|point| format!("via:{}", coordinate(point)))
                .collect::<Vec<_>>()
                .join("|");
            query.push(("waypoints", waypoints));
        }
        query
    }
}

#[async_trait]
impl DirectionsService for GoogleDirections {
    async fn route(&self, request: &DirectionsRequest) -> TrackingResult<Vec<GeoPoint>> {
        let response: DirectionsResponse = self
            .client
            .get("directions", &Self::query(request))
            .await?;
        response.path()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn query_uses_via_waypoints() {
        let request = DirectionsRequest {
            origin: GeoPoint::new(52.5, 13.4),
            destination: GeoPoint::new(52.53, 13.45),
            waypoints: vec![GeoPoint::new(52.51, 13.41), GeoPoint::new(52.52, 13.42)],
        };
        let query = GoogleDirections::query(&request);
        assert_eq!(query[0], ("origin", "52.500000,13.400000".to_owned()));
        assert_eq!(query[2], ("mode", "driving".to_owned()));
        assert_eq!(
            query[3],
            (
                "waypoints",
                "via:52.510000,13.410000|via:52.520000,13.420000".to_owned()
            )
        );
    }

    #[test]
    fn query_without_waypoints() {
        let request = DirectionsRequest {
            origin: GeoPoint::new(1.0, 2.0),
            destination: GeoPoint::new(3.0, 4.0),
            waypoints: vec![],
        };
        assert!(GoogleDirections::query(&request)
            .iter()
            .all(|(name, _)| *name != "waypoints"));
    }

    #[test]
    fn decodes_overview_polyline() {
        let response: DirectionsResponse = serde_json::from_value(json!({
            "status": "OK",
            "routes": [{ "overview_polyline": { "points": "_p~iF~ps|U_ulLnnqC_mqNvxq`@" } }]
        }))
        .unwrap();
        let path = response.path().unwrap();
        assert_eq!(path.len(), 3);
        assert!((path[2].lng - -126.453).abs() < 1e-5);
    }

    #[test]
    fn zero_results_is_an_empty_path() {
        let response: DirectionsResponse =
            serde_json::from_value(json!({ "status": "ZERO_RESULTS", "routes": [] })).unwrap();
        assert!(response.path().unwrap().is_empty());
    }

    #[test]
    fn denied_requests_are_errors() {
        let response: DirectionsResponse = serde_json::from_value(json!({
            "status": "REQUEST_DENIED",
            "error_message": "The provided API key is invalid."
        }))
        .unwrap();
        assert!(matches!(
            response.path(),
            Err(TrackingError::TransientNetwork(_))
        ));
    }

    #[test]
    fn broken_polyline_is_a_data_error() {
        let response: DirectionsResponse = serde_json::from_value(json!({
            "status": "OK",
            "routes": [{ "overview_polyline": { "points": "_p~iF~ps|U_u" } }]
        }))
        .unwrap();
        assert!(matches!(response.path(), Err(TrackingError::DataShape(_))));
    }
}
