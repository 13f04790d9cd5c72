//! One tracking session: everything a detail view needs to follow a single
//! delivery, from the stored snapshot to the live path.
//!
//! The session itself never waits on the routing, geocoding or snapshot
//! services. Such work is handed out as [`Job`]s tagged with the current
//! generation; their [`JobOutcome`]s are fed back through
//! [`TrackingSession::complete`] and dropped if the session has moved on in
//! the meantime. [`TrackingSession::run_jobs`] runs them inline, the session
//! driver runs them as tasks.

use std::{collections::VecDeque, env, str::FromStr, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use model::{
    GeoPoint, Kinematics, LastKnownLocation, LivePathState, TrackingId, TrackingSnapshot,
};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    adapter::{self, ChannelMessage},
    cache::{Eviction, TtlCache},
    directions::{DirectionsResolver, DirectionsService},
    generation::{Generation, GenerationToken},
    geocode::{self, GeocodeEnricher, ReverseGeocoder},
    path::{self, PathInputs, PathSelector, SelectedPath},
    reconciler::{self, Reconciled},
    snapshot::SnapshotSource,
    subscription::{PushChannel, SubscriptionManager, SubscriptionState, Transition},
    viewport::{Viewport, ViewportFitController, DEFAULT_PADDING_DEG},
    TrackingResult, DEFAULT_DEDUP_EPSILON, DEFAULT_WAYPOINT_CAP,
};

const DEFAULT_CACHE_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub dedup_epsilon: f64,
    pub waypoint_cap: usize,
    pub viewport_padding: f64,
    pub placeholder_label: String,
    /// `None` keeps memoized routes and labels for the lifetime of the caches.
    pub cache_ttl: Option<Duration>,
    pub cache_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dedup_epsilon: DEFAULT_DEDUP_EPSILON,
            waypoint_cap: DEFAULT_WAYPOINT_CAP,
            viewport_padding: DEFAULT_PADDING_DEG,
            placeholder_label: geocode::PLACEHOLDER_LABEL.to_owned(),
            cache_ttl: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("ignoring unparsable {}={:?}", name, raw);
            default
        }),
        Err(_) => default,
    }
}

impl SessionConfig {
    /// Defaults overridden by `TRACKING_WAYPOINT_CAP`, `TRACKING_DEDUP_EPSILON`
    /// and `TRACKING_CACHE_TTL_SECS` (0 disables expiry).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let ttl_secs = env_or("TRACKING_CACHE_TTL_SECS", 0u64);
        Self {
            dedup_epsilon: env_or("TRACKING_DEDUP_EPSILON", defaults.dedup_epsilon),
            waypoint_cap: env_or("TRACKING_WAYPOINT_CAP", defaults.waypoint_cap),
            cache_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            ..defaults
        }
    }

    fn eviction(&self) -> Eviction {
        match self.cache_ttl {
            Some(ttl) => Eviction::Ttl(ttl),
            None => Eviction::Never,
        }
    }

    pub fn cache<K: std::hash::Hash + Eq, V: Clone>(&self) -> TtlCache<K, V> {
        TtlCache::new(self.eviction()).with_capacity_limit(self.cache_capacity)
    }
}

/// External collaborators of a session. Cheap to clone.
#[derive(Clone)]
pub struct TrackingDeps {
    pub channel: Arc<dyn PushChannel>,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub directions: Arc<DirectionsResolver>,
    pub geocode: Arc<GeocodeEnricher>,
}

impl TrackingDeps {
    pub fn new(
        channel: Arc<dyn PushChannel>,
        snapshots: Arc<dyn SnapshotSource>,
        directions: Arc<dyn DirectionsService>,
        geocoder: Arc<dyn ReverseGeocoder>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            channel,
            snapshots,
            directions: Arc::new(
                DirectionsResolver::new(directions, config.cache())
                    .with_waypoint_cap(config.waypoint_cap),
            ),
            geocode: Arc::new(
                GeocodeEnricher::new(geocoder, config.cache())
                    .with_placeholder(config.placeholder_label.clone()),
            ),
        }
    }
}

/// Work the session needs done by an external service.
#[derive(Debug, Clone)]
pub enum Job {
    Snapshot {
        token: GenerationToken,
        /// Superseded by every later snapshot request of the session.
        request: GenerationToken,
        tracking_id: TrackingId,
    },
    Path {
        token: GenerationToken,
        inputs: PathInputs,
    },
    Label {
        token: GenerationToken,
        point: GeoPoint,
    },
}

impl Job {
    pub fn token(&self) -> &GenerationToken {
        match self {
            Self::Snapshot { token, .. } | Self::Path { token, .. } | Self::Label { token, .. } => {
                token
            }
        }
    }

    pub async fn run(self, deps: &TrackingDeps) -> JobOutcome {
        match self {
            Self::Snapshot {
                token,
                request,
                tracking_id,
            } => JobOutcome::Snapshot {
                result: deps.snapshots.fetch(&tracking_id).await,
                token,
                request,
            },
            Self::Path { token, inputs } => {
                let selected = path::plan(&inputs, &deps.directions).await;
                JobOutcome::Path {
                    token,
                    inputs,
                    selected,
                }
            }
            Self::Label { token, point } => JobOutcome::Label {
                label: deps.geocode.try_label(&point).await,
                token,
                point,
            },
        }
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Snapshot {
        token: GenerationToken,
        request: GenerationToken,
        result: TrackingResult<TrackingSnapshot>,
    },
    Path {
        token: GenerationToken,
        inputs: PathInputs,
        selected: SelectedPath,
    },
    Label {
        token: GenerationToken,
        point: GeoPoint,
        label: Option<String>,
    },
}

impl JobOutcome {
    pub fn token(&self) -> &GenerationToken {
        match self {
            Self::Snapshot { token, .. } | Self::Path { token, .. } | Self::Label { token, .. } => {
                token
            }
        }
    }
}

/// Changes a renderer may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Subscription(SubscriptionState),
    Snapshot { last_updated: Option<DateTime<Utc>> },
    PathChanged(SelectedPath),
    LivePoint { point: GeoPoint, kinematics: Kinematics },
    LabelChanged(String),
    Recenter(Viewport),
}

/// What [`TrackingSession::begin`] started.
#[derive(Debug)]
pub struct Opening {
    pub transition: Transition,
    pub jobs: Vec<Job>,
}

impl Opening {
    /// The subscription handshake still has to be performed.
    pub fn needs_subscribe(&self) -> bool {
        self.transition != Transition::Unchanged
    }
}

/// Read-only projection of a session for rendering.
#[model::serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub tracking_id: Option<TrackingId>,
    pub subscription: String,
    pub path: Option<SelectedPath>,
    pub path_length_km: f64,
    pub anchors: Vec<GeoPoint>,
    pub live_points: Vec<GeoPoint>,
    pub kinematics: Kinematics,
    pub last_known: Option<LastKnownLocation>,
    pub label: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct TrackingSession {
    config: SessionConfig,
    deps: TrackingDeps,
    generation: Generation,
    snapshot_requests: Generation,
    tracking_id: Option<TrackingId>,
    subscription: SubscriptionManager,
    live: LivePathState,
    snapshot: Option<TrackingSnapshot>,
    selector: PathSelector,
    viewport: ViewportFitController<Box<dyn FnMut(&Viewport) + Send>>,
    label: Option<String>,
    label_key: Option<String>,
    last_error: Option<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl TrackingSession {
    pub fn new(
        config: SessionConfig,
        deps: TrackingDeps,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let recenter = events.clone();
        let on_fit: Box<dyn FnMut(&Viewport) + Send> = Box::new(move |viewport: &Viewport| {
            let _ = recenter.send(SessionEvent::Recenter(*viewport));
        });
        Self {
            viewport: ViewportFitController::new(on_fit).with_padding(config.viewport_padding),
            subscription: SubscriptionManager::new(deps.channel.clone()),
            config,
            deps,
            generation: Generation::new(),
            snapshot_requests: Generation::new(),
            tracking_id: None,
            live: LivePathState::new(),
            snapshot: None,
            selector: PathSelector::new(),
            label: None,
            label_key: None,
            last_error: None,
            events,
        }
    }

    fn emit(&self, event: SessionEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    pub fn deps(&self) -> &TrackingDeps {
        &self.deps
    }

    pub fn tracking_id(&self) -> Option<&TrackingId> {
        self.tracking_id.as_ref()
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn subscription(&self) -> &SubscriptionState {
        self.subscription.state()
    }

    pub fn live(&self) -> &LivePathState {
        &self.live
    }

    pub fn selected_path(&self) -> Option<&SelectedPath> {
        self.selector.selected()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Drops everything derived from the current tracking id.
    fn discard(&mut self) {
        self.live.reset();
        self.snapshot = None;
        self.selector.clear();
        self.viewport.reset();
        self.label = None;
        self.label_key = None;
        self.last_error = None;
    }

    fn snapshot_job(&self) -> Option<Job> {
        let tracking_id = self.tracking_id.clone()?;
        self.snapshot_requests.bump();
        Some(Job::Snapshot {
            token: self.generation.token(),
            request: self.snapshot_requests.token(),
            tracking_id,
        })
    }

    fn label_job(&mut self, point: GeoPoint) -> Option<Job> {
        let key = point.rounded_key(geocode::KEY_DECIMALS);
        if self.label_key.as_deref() == Some(key.as_str()) {
            return None;
        }
        self.label_key = Some(key);
        Some(Job::Label {
            token: self.generation.token(),
            point,
        })
    }

    /// Starts following `tracking_id`. Switching from another id wipes the
    /// live path and invalidates all outstanding work before anything for the
    /// new id happens. Always asks for a fresh snapshot.
    pub fn begin(&mut self, tracking_id: TrackingId) -> Opening {
        let transition = self.subscription.prepare(tracking_id.clone());
        if self.tracking_id.as_ref() != Some(&tracking_id) {
            if let Some(previous) = &self.tracking_id {
                log::info!("switching from {} to {}", previous, tracking_id);
            }
            self.discard();
            self.generation.bump();
            self.tracking_id = Some(tracking_id);
        }
        self.emit(SessionEvent::Subscription(self.subscription.state().clone()));
        Opening {
            transition,
            jobs: self.snapshot_job().into_iter().collect(),
        }
    }

    /// Performs the subscription handshake prepared by `begin`. A failure is
    /// recorded and returned but leaves the session usable on its snapshot.
    pub async fn subscribe(&mut self) -> TrackingResult<()> {
        let result = self.subscription.subscribe().await;
        match &result {
            Ok(()) => self.last_error = None,
            Err(why) => {
                if why.is_transient() {
                    log::warn!("live updates unavailable: {}", why);
                } else {
                    log::error!("live updates unavailable: {}", why);
                }
                self.last_error = Some(why.to_string());
            }
        }
        self.emit(SessionEvent::Subscription(self.subscription.state().clone()));
        result
    }

    /// Re-fetches the snapshot and resubscribes if the channel is not
    /// attached. Nothing happens if no delivery is open.
    pub fn begin_refresh(&mut self) -> Option<Opening> {
        let tracking_id = self.tracking_id.clone()?;
        Some(self.begin(tracking_id))
    }

    /// The push channel dropped; live updates stop until a refresh.
    pub fn channel_lost(&mut self) {
        self.subscription.disconnected();
        self.emit(SessionEvent::Subscription(self.subscription.state().clone()));
    }

    /// Detaches from the channel and discards all state. Results of work
    /// started before are ignored from now on.
    pub async fn close(&mut self) {
        self.subscription.close().await;
        self.discard();
        self.generation.bump();
        if let Some(tracking_id) = self.tracking_id.take() {
            log::info!("closed session for {}", tracking_id);
        }
        self.emit(SessionEvent::Subscription(self.subscription.state().clone()));
    }

    /// Applies one message from the push channel.
    pub fn apply(&mut self, message: &ChannelMessage) -> Vec<Job> {
        if self.tracking_id.is_none() {
            return vec![];
        }
        let event = match adapter::normalize(message) {
            Some(event) => event,
            None => return vec![],
        };
        match reconciler::apply(&mut self.live, self.subscription.identity(), &event) {
            Reconciled::Rejected(_) => vec![],
            Reconciled::Duplicate => self.label_job(event.point).into_iter().collect(),
            Reconciled::Appended => {
                self.emit(SessionEvent::LivePoint {
                    point: event.point,
                    kinematics: self.live.kinematics.clone(),
                });
                self.fit_viewport();
                self.label_job(event.point).into_iter().collect()
            }
        }
    }

    /// Installs the result of a job. Results from an older generation are
    /// dropped. May hand out follow-up jobs.
    pub fn complete(&mut self, outcome: JobOutcome) -> Vec<Job> {
        if !outcome.token().is_current() {
            log::debug!(
                "discarding result of generation {} (now {})",
                outcome.token().value(),
                self.generation.current()
            );
            return vec![];
        }
        match outcome {
            JobOutcome::Snapshot { request, .. } if !request.is_current() => {
                log::debug!("discarding snapshot superseded by a later request");
                vec![]
            }
            JobOutcome::Snapshot {
                result: Ok(snapshot),
                ..
            } => self.install_snapshot(snapshot),
            JobOutcome::Snapshot {
                result: Err(why), ..
            } => {
                log::warn!("snapshot request failed: {}", why);
                self.last_error = Some(why.to_string());
                vec![]
            }
            JobOutcome::Path {
                inputs, selected, ..
            } => {
                self.install_path(&inputs, selected);
                vec![]
            }
            JobOutcome::Label { point, label, .. } => {
                let key = point.rounded_key(geocode::KEY_DECIMALS);
                if self.label_key.as_deref() == Some(key.as_str()) {
                    self.install_label(label);
                } else {
                    log::debug!("discarding label for {}, the courier moved on", key);
                }
                vec![]
            }
        }
    }

    fn install_snapshot(&mut self, snapshot: TrackingSnapshot) -> Vec<Job> {
        if self.tracking_id.as_ref() != Some(&snapshot.id) {
            log::warn!("snapshot for {} does not belong to this session", snapshot.id);
            return vec![];
        }
        let inputs = PathInputs::from_snapshot(&snapshot, self.config.dedup_epsilon);
        let known = snapshot
            .delivery
            .last_known_location
            .as_ref()
            .map(|known| known.location)
            .filter(GeoPoint::is_valid);
        self.emit(SessionEvent::Snapshot {
            last_updated: snapshot.last_updated(),
        });
        self.snapshot = Some(snapshot);

        let mut jobs = vec![];
        if self.selector.is_stale(&inputs) {
            // the raw candidates render right away; the routed ones follow
            let provisional = path::select(&inputs, &Default::default());
            self.selector.install(inputs.clone(), provisional.clone());
            self.emit(SessionEvent::PathChanged(provisional));
            jobs.push(Job::Path {
                token: self.generation.token(),
                inputs,
            });
        }
        self.fit_viewport();
        if self.live.last_known.is_none() {
            jobs.extend(known.and_then(|point| self.label_job(point)));
        }
        jobs
    }

    fn install_path(&mut self, inputs: &PathInputs, selected: SelectedPath) {
        if self.selector.is_stale(inputs) {
            log::debug!("discarding path for outdated inputs");
            return;
        }
        if self.selector.selected() == Some(&selected) {
            return;
        }
        log::debug!(
            "path from {:?}, {} points",
            selected.source,
            selected.points.len()
        );
        self.selector.install(inputs.clone(), selected.clone());
        self.emit(SessionEvent::PathChanged(selected));
        self.fit_viewport();
    }

    /// A resolved label for the newest position replaces the shown one; a
    /// failed lookup only fills in the placeholder if there is no label yet.
    fn install_label(&mut self, label: Option<String>) {
        let label = match (label, &self.label) {
            (Some(label), _) => label,
            (None, None) => self.config.placeholder_label.clone(),
            (None, Some(_)) => return,
        };
        if self.label.as_ref() != Some(&label) {
            self.label = Some(label.clone());
            self.emit(SessionEvent::LabelChanged(label));
        }
    }

    fn anchors(&self) -> Vec<GeoPoint> {
        self.snapshot
            .as_ref()
            .map(|snapshot| {
                snapshot
                    .route
                    .anchors()
                    .into_iter()
                    .filter(GeoPoint::is_valid)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Everything drawn on the map: anchors, live path and selected path.
    pub fn rendered_points(&self) -> Vec<GeoPoint> {
        let mut points = self.anchors();
        points.extend_from_slice(self.live.points());
        if let Some(selected) = self.selector.selected() {
            points.extend_from_slice(&selected.points);
        }
        points
    }

    fn fit_viewport(&mut self) {
        let points = self.rendered_points();
        self.viewport.fit(&points);
    }

    pub fn view(&self) -> SessionView {
        let path = self.selector.selected().cloned();
        SessionView {
            tracking_id: self.tracking_id.clone(),
            subscription: self.subscription.state().to_string(),
            path_length_km: path.as_ref().map(SelectedPath::length_km).unwrap_or(0.0),
            path,
            anchors: self.anchors(),
            live_points: self.live.points().to_vec(),
            kinematics: self.live.kinematics.clone(),
            last_known: self.live.last_known.clone().or_else(|| {
                self.snapshot
                    .as_ref()
                    .and_then(|snapshot| snapshot.delivery.last_known_location.clone())
            }),
            label: self.label.clone(),
            last_updated: self.snapshot.as_ref().and_then(TrackingSnapshot::last_updated),
            last_error: self.last_error.clone(),
        }
    }

    /// Runs `jobs` and everything they lead to, one after the other.
    pub async fn run_jobs(&mut self, jobs: Vec<Job>) {
        let deps = self.deps.clone();
        let mut queue = VecDeque::from(jobs);
        while let Some(job) = queue.pop_front() {
            let outcome = job.run(&deps).await;
            queue.extend(self.complete(outcome));
        }
    }

    /// `begin`, `subscribe` and the resulting jobs in one go. The returned
    /// error is the subscription failure, if any; the snapshot is loaded
    /// either way.
    pub async fn open(&mut self, tracking_id: TrackingId) -> TrackingResult<()> {
        let opening = self.begin(tracking_id);
        let subscribed = if opening.needs_subscribe() {
            self.subscribe().await
        } else {
            Ok(())
        };
        self.run_jobs(opening.jobs).await;
        subscribed
    }

    pub async fn refresh(&mut self) -> TrackingResult<()> {
        match self.tracking_id.clone() {
            Some(tracking_id) => self.open(tracking_id).await,
            None => Ok(()),
        }
    }
}
