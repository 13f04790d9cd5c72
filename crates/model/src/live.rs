use std::collections::HashSet;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{GeoPoint, LastKnownLocation};

/// The moving entity (driver or vehicle) whose positions arrive on the push
/// channel. A tracking id resolves to exactly one courier per session.
#[derive(Debug, Clone, JsonSchema)]
pub struct Courier;

impl HasId for Courier {
    type IdType = String;
}

pub type SubjectId = Id<Courier>;

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Kinematics {
    pub speed_kph: Option<f64>,
    pub heading_deg: Option<f64>,
    pub at: Option<DateTime<Utc>>,
}

/// The single internal shape of a live position event, whatever dialect the
/// channel spoke.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub subject_id: Option<SubjectId>,
    pub point: GeoPoint,
    pub at: Option<DateTime<Utc>>,
    pub speed_kph: Option<f64>,
    pub heading_deg: Option<f64>,
}

impl LiveEvent {
    pub fn kinematics(&self) -> Kinematics {
        Kinematics {
            speed_kph: self.speed_kph,
            heading_deg: self.heading_deg,
            at: self.at,
        }
    }
}

/// Live path of one tracking session. Points can only be appended; the only
/// way to shrink the path is `reset`, which clears everything.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LivePathState {
    ordered_points: Vec<GeoPoint>,
    last_event_key: Option<String>,
    #[serde(skip)]
    seen_keys: HashSet<String>,
    pub kinematics: Kinematics,
    pub last_known: Option<LastKnownLocation>,
}

impl LivePathState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.ordered_points
    }

    pub fn len(&self) -> usize {
        self.ordered_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_points.is_empty()
    }

    pub fn last_event_key(&self) -> Option<&str> {
        self.last_event_key.as_deref()
    }

    pub fn has_seen(&self, key: &str) -> bool {
        self.seen_keys.contains(key)
    }

    /// Appends `point` under `key`. Returns `false` and leaves the path
    /// untouched if the key was recorded before.
    pub fn append(&mut self, key: String, point: GeoPoint) -> bool {
        if !self.seen_keys.insert(key.clone()) {
            return false;
        }
        self.ordered_points.push(point);
        self.last_event_key = Some(key);
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
