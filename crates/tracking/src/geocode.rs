use std::sync::Arc;

use async_trait::async_trait;
use model::GeoPoint;
use tokio::sync::RwLock;

use crate::{cache::TtlCache, TrackingResult};

pub const PLACEHOLDER_LABEL: &str = "Unknown location";

/// Labels are shared between positions that agree to about a meter.
pub const KEY_DECIMALS: usize = 5;

/// External reverse geocoding service. `Ok(None)` means the service answered
/// but knows no label for the position.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, point: &GeoPoint) -> TrackingResult<Option<String>>;
}

pub struct GeocodeEnricher {
    geocoder: Arc<dyn ReverseGeocoder>,
    cache: RwLock<TtlCache<String, String>>,
    placeholder: String,
}

impl GeocodeEnricher {
    pub fn new(geocoder: Arc<dyn ReverseGeocoder>, cache: TtlCache<String, String>) -> Self {
        Self {
            geocoder,
            cache: RwLock::new(cache),
            placeholder: PLACEHOLDER_LABEL.to_owned(),
        }
    }

    pub fn with_placeholder<S: Into<String>>(mut self, placeholder: S) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Label for `point`, or `None` if it could not be resolved.
    pub async fn try_label(&self, point: &GeoPoint) -> Option<String> {
        if !point.is_valid() {
            return None;
        }
        let key = point.rounded_key(KEY_DECIMALS);
        if let Some(label) = self.cache.write().await.get(&key) {
            return Some(label);
        }
        match self.geocoder.reverse(point).await {
            Ok(Some(label)) if !label.trim().is_empty() => {
                let label = label.trim().to_owned();
                self.cache.write().await.insert_if_absent(key, label.clone());
                Some(label)
            }
            Ok(_) => {
                log::debug!("no label known for {}", key);
                None
            }
            Err(why) => {
                log::warn!("reverse geocoding {} failed: {}", key, why);
                None
            }
        }
    }

    /// Label for `point`, falling back to the placeholder.
    pub async fn label(&self, point: &GeoPoint) -> String {
        self.try_label(point)
            .await
            .unwrap_or_else(|| self.placeholder.clone())
    }
}
