use std::env;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::ApiError;

pub const GOOGLE_MAPS_API_URL: &str = "https://maps.googleapis.com/maps/api";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleMapsCredentials {
    pub api_key: String,
    /// ccTLD used as region bias, e.g. `de`.
    pub region: Option<String>,
    pub rate_limit_per_minute: Option<u64>,
    pub proxy: Option<String>,
}

impl GoogleMapsCredentials {
    /// Reads `GOOGLE_MAPS_API_KEY`, `GOOGLE_MAPS_REGION` and
    /// `GOOGLE_MAPS_RATE_LIMIT_PER_MINUTE`. `None` without an api key.
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("GOOGLE_MAPS_API_KEY").ok()?;
        let region = env::var("GOOGLE_MAPS_REGION")
            .ok()
            .filter(|region| !region.trim().is_empty());
        let rate_limit_per_minute = env::var("GOOGLE_MAPS_RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|limit| limit.parse().ok());
        Some(Self {
            api_key,
            region,
            rate_limit_per_minute,
            proxy: env::var("GOOGLE_MAPS_PROXY").ok(),
        })
    }
}

struct GoogleMapsClientState {
    pub available_requests: u64,
    pub last_refill: DateTime<Utc>,
}

pub struct GoogleMapsClient {
    pub credentials: GoogleMapsCredentials,
    base_url: String,
    http: reqwest::Client,
    state: RwLock<GoogleMapsClientState>,
}

impl GoogleMapsClient {
    pub fn new(credentials: &GoogleMapsCredentials) -> Result<Self, ApiError> {
        let http = match &credentials.proxy {
            Some(proxy_url) => reqwest::Client::builder()
                .proxy(reqwest::Proxy::all(proxy_url)?)
                .build()?,
            None => reqwest::Client::new(),
        };
        Ok(Self {
            credentials: credentials.clone(),
            base_url: GOOGLE_MAPS_API_URL.to_owned(),
            http,
            state: RwLock::new(GoogleMapsClientState {
                available_requests: credentials.rate_limit_per_minute.unwrap_or(0),
                last_refill: Utc::now(),
            }),
        })
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn available_requests(&self) -> u64 {
        self.state.read().await.available_requests
    }

    async fn try_decrement_available_requests(&self) -> Result<(), ApiError> {
        if let Some(rate_limit_minutes) = self.credentials.rate_limit_per_minute {
            let mut state = self.state.write().await;

            let minutes_since_last_refill = (Utc::now() - state.last_refill).num_minutes();
            if minutes_since_last_refill >= 1 {
                state.available_requests = rate_limit_minutes;
                state.last_refill = Utc::now();
            }

            if state.available_requests != 0 {
                state.available_requests -= 1;
            } else {
                return Err(ApiError::RateLimitReached);
            }
        }
        Ok(())
    }

    /// Full url of a JSON endpoint, with the region bias and the key appended
    /// to `query`.
    pub fn url(&self, endpoint: &str, query: &[(&str, String)]) -> Result<reqwest::Url, ApiError> {
        let mut params = query.to_vec();
        if let Some(region) = &self.credentials.region {
            params.push(("region", region.clone()));
        }
        params.push(("key", self.credentials.api_key.clone()));
        reqwest::Url::parse_with_params(&format!("{}/{}/json", self.base_url, endpoint), &params)
            .map_err(|why| ApiError::Other(format!("invalid url for {}: {}", endpoint, why)))
    }

    /// Fetch data from an endpoint using this client.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        self.try_decrement_available_requests().await?;

        let url = self.url(endpoint, query)?;
        log::debug!("requesting endpoint '{}'", endpoint);
        let response = self.http.get(url.clone()).send().await?;

        match response.status() {
            reqwest::StatusCode::OK => Ok(serde_json::from_str(&response.text().await?)?),
            other => {
                // never leak the key into logs
                let mut url = url;
                url.set_query(None);
                Err(ApiError::InvalidResponse {
                    status_code: other,
                    url: url.to_string(),
                    response: response.text().await.ok(),
                })
            }
        }
    }
}
