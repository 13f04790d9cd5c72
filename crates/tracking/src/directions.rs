use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use itertools::Itertools;
use model::GeoPoint;
use tokio::sync::{Mutex, RwLock};

use crate::{cache::TtlCache, waypoints, TrackingResult, DEFAULT_WAYPOINT_CAP};

const KEY_DECIMALS: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct DirectionsRequest {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub waypoints: Vec<GeoPoint>,
}

impl DirectionsRequest {
    /// Builds a request through `points`, thinning the interior down to
    /// `waypoint_cap`. Invalid coordinates are skipped; fewer than two valid
    /// points yield `None`.
    pub fn through(points: &[GeoPoint], waypoint_cap: usize) -> Option<Self> {
        let valid = points
            .iter()
            .copied()
            .filter(GeoPoint::is_valid)
            .collect::<Vec<_>>();
        if valid.len() < 2 {
            return None;
        }
        let mut sampled = waypoints::sample(&valid, waypoint_cap);
        let destination = sampled.pop()?;
        let origin = sampled.remove(0);
        Some(Self {
            origin,
            destination,
            waypoints: sampled,
        })
    }

    /// Identifies the input tuple for memoization.
    pub fn key(&self) -> String {
        let waypoints = self
            .waypoints
            .iter()
            .map(|point| point.rounded_key(KEY_DECIMALS))
            .join("|");
        format!(
            "{}>{}>{}",
            self.origin.rounded_key(KEY_DECIMALS),
            self.destination.rounded_key(KEY_DECIMALS),
            waypoints
        )
    }
}

/// External routing service returning the driving path for a request.
#[async_trait]
pub trait DirectionsService: Send + Sync {
    async fn route(&self, request: &DirectionsRequest) -> TrackingResult<Vec<GeoPoint>>;
}

type PendingRoute = Shared<BoxFuture<'static, Vec<GeoPoint>>>;

/// Resolves road paths through anchor points, at most one successful service
/// call per distinct request. Concurrent identical requests share one call.
/// Failures are never memoized, so a later call with the same input tries
/// again.
pub struct DirectionsResolver {
    service: Arc<dyn DirectionsService>,
    cache: RwLock<TtlCache<String, Vec<GeoPoint>>>,
    in_flight: Mutex<HashMap<String, PendingRoute>>,
    waypoint_cap: usize,
}

impl DirectionsResolver {
    pub fn new(
        service: Arc<dyn DirectionsService>,
        cache: TtlCache<String, Vec<GeoPoint>>,
    ) -> Self {
        Self {
            service,
            cache: RwLock::new(cache),
            in_flight: Mutex::new(HashMap::new()),
            waypoint_cap: DEFAULT_WAYPOINT_CAP,
        }
    }

    pub fn with_waypoint_cap(mut self, waypoint_cap: usize) -> Self {
        self.waypoint_cap = waypoint_cap;
        self
    }

    pub fn waypoint_cap(&self) -> usize {
        self.waypoint_cap
    }

    /// Road path through `anchors`, or an empty vec if there are fewer than
    /// two anchors or the service fails.
    pub async fn resolve(&self, anchors: &[GeoPoint]) -> Vec<GeoPoint> {
        let request = match DirectionsRequest::through(anchors, self.waypoint_cap) {
            Some(request) => request,
            None => return vec![],
        };
        let key = request.key();
        if let Some(path) = self.cache.write().await.get(&key) {
            log::debug!("directions cache hit for {}", key);
            return path;
        }

        let pending = {
            let mut in_flight = self.in_flight.lock().await;
            // a call for this key may have finished while we waited
            if let Some(path) = self.cache.write().await.get(&key) {
                return path;
            }
            match in_flight.get(&key) {
                Some(pending) => {
                    log::debug!("joining pending directions request for {}", key);
                    pending.clone()
                }
                None => {
                    let pending = fetch(self.service.clone(), request).boxed().shared();
                    in_flight.insert(key.clone(), pending.clone());
                    pending
                }
            }
        };

        let path = pending.clone().await;
        if path.len() >= 2 {
            self.cache.write().await.insert_if_absent(key.clone(), path.clone());
        }
        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(&key)
            .is_some_and(|current| current.ptr_eq(&pending))
        {
            in_flight.remove(&key);
        }
        path
    }
}

/// One service call. Yields an empty path on failure or on a path too short
/// to draw.
async fn fetch(service: Arc<dyn DirectionsService>, request: DirectionsRequest) -> Vec<GeoPoint> {
    let path = match service.route(&request).await {
        Ok(path) => path
            .into_iter()
            .filter(GeoPoint::is_valid)
            .collect::<Vec<_>>(),
        Err(why) => {
            log::warn!("directions request failed, falling back: {}", why);
            return vec![];
        }
    };
    if path.len() < 2 {
        log::warn!("directions service returned {} usable points", path.len());
        return vec![];
    }
    path
}
