use model::{GeoPoint, PathSource, TrackingSnapshot};
use serde::Serialize;
use utility::geo;

use crate::{directions::DirectionsResolver, history, polyline};

/// Everything the path depends on. Two equal inputs always select the same
/// path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathInputs {
    /// Sorted and deduplicated history.
    pub history: Vec<GeoPoint>,
    pub polyline: Option<String>,
    /// Pickup followed by the stops.
    pub anchors: Vec<GeoPoint>,
}

impl PathInputs {
    pub fn from_snapshot(snapshot: &TrackingSnapshot, epsilon: f64) -> Self {
        Self {
            history: history::clean_with_epsilon(&snapshot.delivery.history, epsilon),
            polyline: snapshot.route.polyline().map(str::to_owned),
            anchors: snapshot
                .route
                .anchors()
                .into_iter()
                .filter(GeoPoint::is_valid)
                .collect(),
        }
    }

    fn decoded_polyline(&self) -> Vec<GeoPoint> {
        self.polyline
            .as_deref()
            .map(polyline::decode)
            .unwrap_or_default()
    }
}

/// Paths obtained from the routing service for a given set of inputs. Empty
/// when not requested or when the service failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPaths {
    pub snapped_history: Vec<GeoPoint>,
    pub routed_anchors: Vec<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedPath {
    pub source: PathSource,
    pub points: Vec<GeoPoint>,
}

impl SelectedPath {
    pub fn none() -> Self {
        Self {
            source: PathSource::None,
            points: vec![],
        }
    }

    fn candidate(source: PathSource, points: Vec<GeoPoint>) -> Option<Self> {
        (points.len() >= 2).then_some(Self { source, points })
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn length_km(&self) -> f64 {
        geo::path_length_km(self.points.iter().map(|point| (point.lat, point.lng)))
    }
}

/// Picks the first candidate with at least two points:
/// road-snapped history, raw history, decoded polyline, routed anchors, a
/// straight line through the anchors, and finally no path at all.
pub fn select(inputs: &PathInputs, resolved: &ResolvedPaths) -> SelectedPath {
    SelectedPath::candidate(PathSource::SnappedHistory, resolved.snapped_history.clone())
        .or_else(|| SelectedPath::candidate(PathSource::History, inputs.history.clone()))
        .or_else(|| SelectedPath::candidate(PathSource::EncodedPolyline, inputs.decoded_polyline()))
        .or_else(|| SelectedPath::candidate(PathSource::RoutedAnchors, resolved.routed_anchors.clone()))
        .or_else(|| SelectedPath::candidate(PathSource::StraightLine, inputs.anchors.clone()))
        .unwrap_or_else(SelectedPath::none)
}

/// Asks the routing service only for the candidates that can still win, then
/// selects.
pub async fn plan(inputs: &PathInputs, resolver: &DirectionsResolver) -> SelectedPath {
    let mut resolved = ResolvedPaths::default();
    if inputs.history.len() >= 2 {
        resolved.snapped_history = resolver.resolve(&inputs.history).await;
    } else if inputs.decoded_polyline().len() < 2 && inputs.anchors.len() >= 2 {
        resolved.routed_anchors = resolver.resolve(&inputs.anchors).await;
    }
    select(inputs, &resolved)
}

/// Holds the last selected path together with the inputs it was computed
/// from, so that recomputation only happens when an input changed.
#[derive(Debug, Default)]
pub struct PathSelector {
    inputs: Option<PathInputs>,
    selected: Option<SelectedPath>,
}

impl PathSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stale(&self, inputs: &PathInputs) -> bool {
        self.inputs.as_ref() != Some(inputs)
    }

    pub fn install(&mut self, inputs: PathInputs, selected: SelectedPath) {
        self.inputs = Some(inputs);
        self.selected = Some(selected);
    }

    pub fn selected(&self) -> Option<&SelectedPath> {
        self.selected.as_ref()
    }

    pub fn clear(&mut self) {
        self.inputs = None;
        self.selected = None;
    }
}
