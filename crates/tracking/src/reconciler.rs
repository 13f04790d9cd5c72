use model::{LastKnownLocation, LiveEvent, LivePathState, SubjectId};
use utility::serde::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The event names a different courier than the session is tracking.
    ForeignSubject,
    /// Non-finite or out-of-range coordinates.
    InvalidCoordinates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// New key; the point was appended and the scalars updated.
    Appended,
    /// Key seen before; the path is unchanged but the scalars were updated.
    Duplicate,
    Rejected(Rejection),
}

/// The event's timestamp in canonical ISO form, or its coordinates if it has
/// none.
pub fn dedup_key(event: &LiveEvent) -> String {
    match &event.at {
        Some(at) => timestamp::to_iso(at),
        None => event.point.key(),
    }
}

/// An event is foreign only if both sides name a courier and they differ.
pub fn is_foreign(identity: Option<&SubjectId>, event: &LiveEvent) -> bool {
    matches!(
        (identity, event.subject_id.as_ref()),
        (Some(expected), Some(actual)) if expected != actual
    )
}

/// Applies one live event to the session's path.
///
/// Points are appended in arrival order; an event older than the newest
/// accepted point is still appended when its key is new. Kinematics and the
/// last known location always take the values of the latest applied event.
pub fn apply(
    state: &mut LivePathState,
    identity: Option<&SubjectId>,
    event: &LiveEvent,
) -> Reconciled {
    if is_foreign(identity, event) {
        log::debug!(
            "ignoring event for {:?}, tracking {:?}",
            event.subject_id,
            identity
        );
        return Reconciled::Rejected(Rejection::ForeignSubject);
    }
    if !event.point.is_valid() {
        log::debug!("ignoring event with invalid coordinates {:?}", event.point);
        return Reconciled::Rejected(Rejection::InvalidCoordinates);
    }

    let appended = state.append(dedup_key(event), event.point);
    state.kinematics = event.kinematics();
    state.last_known = Some(LastKnownLocation {
        location: event.point,
        updated_at: event.at,
    });

    if appended {
        Reconciled::Appended
    } else {
        Reconciled::Duplicate
    }
}
