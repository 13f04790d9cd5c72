use model::GeoPoint;

/// Step between retained interior points so that at most `cap` of
/// `interior_count` survive. A cap of zero keeps none.
pub fn stride(interior_count: usize, cap: usize) -> Option<usize> {
    if cap == 0 {
        None
    } else {
        Some(interior_count.div_ceil(cap).max(1))
    }
}

/// Thins `points` for a routing request. The first and last point are always
/// kept; interior points are taken every `stride(interior, cap)` steps,
/// starting with the first interior point, so order is preserved and at most
/// `cap` interior points remain.
pub fn sample(points: &[GeoPoint], cap: usize) -> Vec<GeoPoint> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let first = points[0];
    let last = points[points.len() - 1];
    let interior = &points[1..points.len() - 1];

    let mut sampled = Vec::with_capacity(cap.min(interior.len()) + 2);
    sampled.push(first);
    if let Some(step) = stride(interior.len(), cap) {
        sampled.extend(interior.iter().step_by(step).copied());
    }
    sampled.push(last);
    sampled
}
