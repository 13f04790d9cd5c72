use std::env;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{ApiError, Response};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchApiCredentials {
    pub base_url: String,
    pub token: Option<String>,
    pub proxy: Option<String>,
}

impl DispatchApiCredentials {
    /// Reads `DISPATCH_API_URL` and the optional `DISPATCH_API_TOKEN`.
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("DISPATCH_API_URL").ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: env::var("DISPATCH_API_TOKEN").ok(),
            proxy: env::var("DISPATCH_API_PROXY").ok(),
        })
    }
}

pub struct DispatchApiClient {
    pub credentials: DispatchApiCredentials,
    http: reqwest::Client,
}

impl DispatchApiClient {
    pub fn new(credentials: &DispatchApiCredentials) -> Result<Self, ApiError> {
        let http = match &credentials.proxy {
            Some(proxy_url) => reqwest::Client::builder()
                .proxy(reqwest::Proxy::all(proxy_url)?)
                .build()?,
            None => reqwest::Client::new(),
        };
        Ok(Self {
            credentials: credentials.clone(),
            http,
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.credentials.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    pub fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let request = self
            .http
            .request(method, self.url(endpoint))
            .header("accept", "application/json");
        match &self.credentials.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends `request` and returns the raw response if it succeeded.
    pub async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await?;
        let url = response.url().to_string();
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(url)),
            other => Err(ApiError::InvalidResponse {
                status_code: other,
                url,
                response: response.text().await.ok(),
            }),
        }
    }

    /// Fetch data from an endpoint using this client. `None` for an empty
    /// body.
    pub async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
    ) -> Result<Option<T>, ApiError> {
        log::debug!("requesting {} '{}'", method, endpoint);
        let response = self.send(self.request(method, endpoint)).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let response: Response<T> = serde_json::from_str(&body)?;
        Ok(Some(response.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_cleanly() {
        let client = DispatchApiClient::new(&DispatchApiCredentials {
            base_url: "https://dispatch.example.com/api/".to_owned(),
            token: None,
            proxy: None,
        })
        .unwrap();
        assert_eq!(
            client.url("/deliveries/42"),
            "https://dispatch.example.com/api/deliveries/42"
        );
    }
}
