#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream::BoxStream;
use model::{
    DeliverySnapshot, GeoPoint, LastKnownLocation, Place, RouteSnapshot, SubjectId, TimedPoint,
    TrackingId, TrackingSnapshot,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracking::{
    adapter::ChannelMessage,
    directions::{DirectionsRequest, DirectionsService},
    geocode::ReverseGeocoder,
    session::{SessionConfig, SessionEvent, TrackingDeps, TrackingSession},
    snapshot::SnapshotSource,
    subscription::{LatestFix, PushChannel, SubscribeAck},
    SubscriptionFailure, TrackingError, TrackingResult,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn id(raw: &str) -> TrackingId {
    TrackingId::new(raw.to_owned())
}

#[derive(Default)]
pub struct FakeChannel {
    /// Courier named in the ack; `None` forces the `latest` pull.
    pub ack_identity: Mutex<Option<String>>,
    pub latest_identity: Mutex<Option<String>>,
    pub reject: AtomicBool,
    /// Streams stay open after `unsubscribe`, like a connection that simply
    /// goes quiet.
    pub keep_streams: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    streams: Mutex<Vec<(TrackingId, mpsc::UnboundedSender<ChannelMessage>)>>,
}

impl FakeChannel {
    pub fn with_identity(identity: &str) -> Self {
        let channel = Self::default();
        *channel.ack_identity.lock().unwrap() = Some(identity.to_owned());
        channel
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Streams of `tracking_id` whose consumer is still around.
    pub fn open_streams(&self, tracking_id: &TrackingId) -> usize {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .filter(|(stream_id, sender)| stream_id == tracking_id && !sender.is_closed())
            .count()
    }

    /// Publishes `message` to every open stream of `tracking_id`.
    pub fn publish(&self, tracking_id: &TrackingId, message: ChannelMessage) {
        for (stream_id, sender) in self.streams.lock().unwrap().iter() {
            if stream_id == tracking_id {
                let _ = sender.send(message.clone());
            }
        }
    }
}

#[async_trait]
impl PushChannel for FakeChannel {
    async fn subscribe(&self, tracking_id: &TrackingId) -> TrackingResult<SubscribeAck> {
        self.calls.lock().unwrap().push(format!("subscribe {}", tracking_id));
        if self.reject.load(Ordering::SeqCst) {
            return Err(SubscriptionFailure::Timeout.into());
        }
        Ok(SubscribeAck {
            ok: true,
            latest: Some(LatestFix {
                subject_id: self
                    .ack_identity
                    .lock()
                    .unwrap()
                    .as_deref()
                    .and_then(SubjectId::parse),
            }),
            error: None,
        })
    }

    async fn latest(&self, tracking_id: &TrackingId) -> TrackingResult<Option<LatestFix>> {
        self.calls.lock().unwrap().push(format!("latest {}", tracking_id));
        Ok(Some(LatestFix {
            subject_id: self
                .latest_identity
                .lock()
                .unwrap()
                .as_deref()
                .and_then(SubjectId::parse),
        }))
    }

    async fn unsubscribe(&self, tracking_id: &TrackingId) -> TrackingResult<()> {
        self.calls.lock().unwrap().push(format!("unsubscribe {}", tracking_id));
        if self.keep_streams.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.streams
            .lock()
            .unwrap()
            .retain(|(stream_id, _)| stream_id != tracking_id);
        Ok(())
    }

    async fn events(
        &self,
        tracking_id: &TrackingId,
    ) -> TrackingResult<BoxStream<'static, ChannelMessage>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.streams
            .lock()
            .unwrap()
            .push((tracking_id.clone(), sender));
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }
}

#[derive(Default)]
pub struct FakeSnapshots {
    pub snapshots: Mutex<HashMap<TrackingId, TrackingSnapshot>>,
    pub fetches: AtomicUsize,
}

impl FakeSnapshots {
    pub fn with(snapshots: Vec<TrackingSnapshot>) -> Self {
        Self {
            snapshots: Mutex::new(
                snapshots
                    .into_iter()
                    .map(|snapshot| (snapshot.id.clone(), snapshot))
                    .collect(),
            ),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[derive(Debug)]
struct NotFound(String);

impl std::fmt::Display for NotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} not found", self.0)
    }
}

impl std::error::Error for NotFound {}

#[async_trait]
impl SnapshotSource for FakeSnapshots {
    async fn fetch(&self, tracking_id: &TrackingId) -> TrackingResult<TrackingSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.snapshots
            .lock()
            .unwrap()
            .get(tracking_id)
            .cloned()
            .ok_or_else(|| TrackingError::network(NotFound(tracking_id.to_string())))
    }
}

/// Routes every request as origin, waypoints and destination with a kink
/// after the origin, so results are distinguishable from their input.
#[derive(Default)]
pub struct FakeDirections {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl DirectionsService for FakeDirections {
    async fn route(&self, request: &DirectionsRequest) -> TrackingResult<Vec<GeoPoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TrackingError::Other("routing unavailable".to_owned()));
        }
        let kink = GeoPoint::new(request.origin.lat + 0.0005, request.origin.lng);
        let mut path = vec![request.origin, kink];
        path.extend(request.waypoints.iter().copied());
        path.push(request.destination);
        Ok(path)
    }
}

#[derive(Default)]
pub struct FakeGeocoder {
    pub fail: AtomicBool,
}

#[async_trait]
impl ReverseGeocoder for FakeGeocoder {
    async fn reverse(&self, point: &GeoPoint) -> TrackingResult<Option<String>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TrackingError::Other("geocoder unavailable".to_owned()));
        }
        Ok(Some(format!("near {:.3},{:.3}", point.lat, point.lng)))
    }
}

pub struct Harness {
    pub channel: Arc<FakeChannel>,
    pub snapshots: Arc<FakeSnapshots>,
    pub directions: Arc<FakeDirections>,
    pub geocoder: Arc<FakeGeocoder>,
}

impl Harness {
    pub fn new(channel: FakeChannel, snapshots: Vec<TrackingSnapshot>) -> Self {
        init_logging();
        Self {
            channel: Arc::new(channel),
            snapshots: Arc::new(FakeSnapshots::with(snapshots)),
            directions: Arc::new(FakeDirections::default()),
            geocoder: Arc::new(FakeGeocoder::default()),
        }
    }

    pub fn deps(&self) -> TrackingDeps {
        TrackingDeps::new(
            self.channel.clone(),
            self.snapshots.clone(),
            self.directions.clone(),
            self.geocoder.clone(),
            &SessionConfig::default(),
        )
    }

    pub fn session(&self) -> (TrackingSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            TrackingSession::new(SessionConfig::default(), self.deps(), events),
            receiver,
        )
    }
}

fn at(second: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_714_557_600 + second, 0).unwrap()
}

/// A delivery from a depot to two stops, with optional history and polyline.
pub fn snapshot(
    raw_id: &str,
    history: &[(f64, f64)],
    polyline: Option<&str>,
) -> TrackingSnapshot {
    let history = history
        .iter()
        .enumerate()
        .map(|(index, (lat, lng))| TimedPoint::new(GeoPoint::new(*lat, *lng), at(index as i64)))
        .collect::<Vec<_>>();
    TrackingSnapshot {
        id: id(raw_id),
        route: RouteSnapshot {
            start: Place::new(GeoPoint::new(52.50, 13.40), Some("Depot".to_owned())),
            stops: vec![
                Place::new(GeoPoint::new(52.52, 13.41), None),
                Place::new(GeoPoint::new(52.53, 13.45), None),
            ],
            encoded_polyline: polyline.map(str::to_owned),
            last_updated: Some(at(-60)),
        },
        delivery: DeliverySnapshot {
            last_known_location: history.last().map(|last| LastKnownLocation {
                location: last.point,
                updated_at: Some(last.at),
            }),
            history,
        },
        fetched_at: Utc::now(),
    }
}

pub fn location(subject: Option<&str>, lat: f64, lng: f64, second: Option<i64>) -> ChannelMessage {
    let mut payload = json!({ "coordinates": [lng, lat], "speedKph": 25.0 });
    if let Some(subject) = subject {
        payload["subjectId"] = json!(subject);
    }
    if let Some(second) = second {
        payload["at"] = json!(at(second).to_rfc3339());
    }
    ChannelMessage::new("location_update", payload)
}
