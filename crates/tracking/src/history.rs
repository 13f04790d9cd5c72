use model::{GeoPoint, TimedPoint};

use crate::DEFAULT_DEDUP_EPSILON;

/// Sorts pings by time and collapses runs of (nearly) identical positions,
/// using the default epsilon.
pub fn clean(points: &[TimedPoint]) -> Vec<GeoPoint> {
    clean_with_epsilon(points, DEFAULT_DEDUP_EPSILON)
}

/// Like [`clean`], with an explicit epsilon in degrees.
///
/// The sort is stable, so pings sharing a timestamp keep their input order.
/// A point is dropped if both axes are within `epsilon` of the last point that
/// was kept, which keeps slow drift from being swallowed entirely. Invalid
/// coordinates are dropped before comparison.
pub fn clean_with_epsilon(points: &[TimedPoint], epsilon: f64) -> Vec<GeoPoint> {
    let mut sorted = points
        .iter()
        .filter(|timed| {
            let valid = timed.point.is_valid();
            if !valid {
                log::debug!("dropping invalid history point {:?}", timed.point);
            }
            valid
        })
        .collect::<Vec<_>>();
    sorted.sort_by_key(|timed| timed.at);

    let mut cleaned: Vec<GeoPoint> = Vec::with_capacity(sorted.len());
    for timed in sorted {
        match cleaned.last() {
            Some(last) if last.is_near(&timed.point, epsilon) => {}
            _ => cleaned.push(timed.point),
        }
    }
    cleaned
}
