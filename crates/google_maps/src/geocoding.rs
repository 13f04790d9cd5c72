use std::sync::Arc;

use async_trait::async_trait;
use model::GeoPoint;
use serde::Deserialize;
use tracking::{geocode::ReverseGeocoder, TrackingResult};

use crate::{check_status, client::GoogleMapsClient};

#[derive(Debug, Deserialize)]
struct GeocodingResult {
    formatted_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GeocodingResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

impl GeocodingResponse {
    /// Address of the most specific result.
    pub fn label(&self) -> TrackingResult<Option<String>> {
        if !check_status(&self.status, self.error_message.as_deref())? {
            return Ok(None);
        }
        Ok(self
            .results
            .iter()
            .filter_map(|result| result.formatted_address.as_deref())
            .map(str::trim)
            .find(|address| !address.is_empty())
            .map(str::to_owned))
    }
}

pub struct GoogleGeocoder {
    client: Arc<GoogleMapsClient>,
    language: Option<String>,
}

impl GoogleGeocoder {
    pub fn new(client: Arc<GoogleMapsClient>) -> Self {
        Self {
            client,
            language: None,
        }
    }

    pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
        self.language = Some(language.into());
        self
    }

    fn query(&self, point: &GeoPoint) -> Vec<(&'static str, String)> {
        let mut query = vec![("latlng", point.rounded_key(6))];
        if let Some(language) = &self.language {
            query.push(("language", language.clone()));
        }
        query
    }
}

#[async_trait]
impl ReverseGeocoder for GoogleGeocoder {
    async fn reverse(&self, point: &GeoPoint) -> TrackingResult<Option<String>> {
        let response: GeocodingResponse = self.client.get("geocode", &self.query(point)).await?;
        response.label()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tracking::TrackingError;

    use super::*;
    use crate::client::GoogleMapsCredentials;

    #[test]
    fn first_address_wins() {
        let response: GeocodingResponse = serde_json::from_value(json!({
            "status": "OK",
            "results": [
                { "place_id": "x" },
                { "formatted_address": "Alexanderplatz 1, 10178 Berlin, Germany" },
                { "formatted_address": "Berlin, Germany" }
            ]
        }))
        .unwrap();
        assert_eq!(
            response.label().unwrap().as_deref(),
            Some("Alexanderplatz 1, 10178 Berlin, Germany")
        );
    }

    #[test]
    fn zero_results_is_no_label() {
        let response: GeocodingResponse =
            serde_json::from_value(json!({ "status": "ZERO_RESULTS", "results": [] })).unwrap();
        assert_eq!(response.label().unwrap(), None);
    }

    #[test]
    fn over_quota_is_an_error() {
        let response: GeocodingResponse =
            serde_json::from_value(json!({ "status": "OVER_QUERY_LIMIT" })).unwrap();
        assert!(matches!(
            response.label(),
            Err(TrackingError::TransientNetwork(_))
        ));
    }

    #[test]
    fn query_has_fixed_precision() {
        let client = GoogleMapsClient::new(&GoogleMapsCredentials {
            api_key: "secret".to_owned(),
            region: None,
            rate_limit_per_minute: None,
            proxy: None,
        })
        .unwrap();
        let geocoder = GoogleGeocoder::new(Arc::new(client)).with_language("de");
        assert_eq!(
            geocoder.query(&GeoPoint::new(52.52, 13.405)),
            vec![
                ("latlng", "52.520000,13.405000".to_owned()),
                ("language", "de".to_owned())
            ]
        );
    }
}
