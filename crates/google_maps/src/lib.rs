use std::{error, fmt, sync::Arc};

use tracking::TrackingError;

pub mod client;
pub mod directions;
pub mod geocoding;

/// Statuses the web services use for "understood, but nothing found".
pub const ZERO_RESULTS: &str = "ZERO_RESULTS";

#[derive(Debug, Clone)]
pub enum ApiError {
    RequestError(Arc<reqwest::Error>),
    JsonError(Arc<serde_json::Error>),
    InvalidResponse {
        status_code: reqwest::StatusCode,
        url: String,
        response: Option<String>,
    },
    /// HTTP 200, but the body's `status` is neither `OK` nor `ZERO_RESULTS`.
    Status {
        status: String,
        message: Option<String>,
    },
    RateLimitReached,
    Other(String),
}

impl error::Error for ApiError {}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::RequestError(e) => write!(f, "HTTP request error: {}", e),
            ApiError::JsonError(e) => write!(f, "JSON parse error: {}", e),
            ApiError::InvalidResponse {
                status_code,
                url,
                response,
            } => match response {
                Some(text) => {
                    write!(f, "Invalid Response ({}) {}: {}", status_code, text, url)
                }
                None => write!(f, "Invalid Response ({}) {}", status_code, url),
            },
            ApiError::Status { status, message } => match message {
                Some(message) => write!(f, "Request denied ({}): {}", status, message),
                None => write!(f, "Request denied ({})", status),
            },
            ApiError::RateLimitReached => write!(f, "Rate limit reached."),
            ApiError::Other(e) => write!(f, "{e}"),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::RequestError(Arc::new(e))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::JsonError(Arc::new(e))
    }
}

impl From<ApiError> for TrackingError {
    fn from(e: ApiError) -> Self {
        TrackingError::network(e)
    }
}

/// Checks the `status` every web service response carries. Returns whether
/// the response has results.
pub fn check_status(status: &str, message: Option<&str>) -> Result<bool, ApiError> {
    match status {
        "OK" => Ok(true),
        ZERO_RESULTS => Ok(false),
        other => Err(ApiError::Status {
            status: other.to_owned(),
            message: message.map(str::to_owned),
        }),
    }
}
