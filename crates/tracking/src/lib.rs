use std::{error::Error, fmt};

pub mod adapter;
pub mod cache;
pub mod directions;
pub mod driver;
pub mod generation;
pub mod geocode;
pub mod history;
pub mod path;
pub mod polyline;
pub mod reconciler;
pub mod session;
pub mod snapshot;
pub mod subscription;
pub mod viewport;
pub mod waypoints;

/// Maximum number of intermediate points the routing service accepts.
pub const DEFAULT_WAYPOINT_CAP: usize = 23;

/// Two consecutive history points closer than this (degrees, per axis) are
/// treated as the same position.
pub const DEFAULT_DEDUP_EPSILON: f64 = 1e-5;

#[derive(Debug)]
pub enum SubscriptionFailure {
    /// The channel answered the subscribe request with a negative ack.
    Rejected(Option<String>),
    /// The handshake did not complete in the transport's time window.
    Timeout,
    /// The channel is gone, e.g. the connection was dropped.
    Disconnected,
}

#[derive(Debug)]
pub enum TrackingError {
    /// A snapshot, routing or geocoding request failed. Recovered by falling
    /// back to the next path candidate or a placeholder.
    TransientNetwork(Box<dyn Error + Send + Sync>),
    /// The push channel could not be subscribed. The view stays on the last
    /// snapshot until the caller refreshes.
    Subscription(SubscriptionFailure),
    /// A coordinate was non-numeric or out of range.
    DataShape(String),
    /// The session task is gone.
    SessionClosed,
    Other(String),
}

impl TrackingError {
    pub fn network<E: Error + Send + Sync + 'static>(why: E) -> Self {
        Self::TransientNetwork(Box::new(why))
    }

    pub fn data_shape<S: Into<String>>(why: S) -> Self {
        Self::DataShape(why.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::Subscription(_))
    }
}

impl Error for TrackingError {}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TransientNetwork(why) => write!(f, "network request failed: {}", why),
            Self::Subscription(SubscriptionFailure::Rejected(Some(reason))) => {
                write!(f, "subscription rejected: {}", reason)
            }
            Self::Subscription(SubscriptionFailure::Rejected(None)) => {
                write!(f, "subscription rejected")
            }
            Self::Subscription(SubscriptionFailure::Timeout) => {
                write!(f, "subscription timed out")
            }
            Self::Subscription(SubscriptionFailure::Disconnected) => {
                write!(f, "push channel disconnected")
            }
            Self::DataShape(why) => write!(f, "invalid data: {}", why),
            Self::SessionClosed => write!(f, "tracking session is closed"),
            Self::Other(why) => write!(f, "{}", why),
        }
    }
}

impl From<SubscriptionFailure> for TrackingError {
    fn from(value: SubscriptionFailure) -> Self {
        Self::Subscription(value)
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for TrackingError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::SessionClosed
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TrackingError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::SessionClosed
    }
}

pub type TrackingResult<O> = Result<O, TrackingError>;
