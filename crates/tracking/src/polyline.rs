//! Decoder for the encoded polyline algorithm format: every coordinate is the
//! zig-zag encoded delta to the previous one, scaled by 1e5 and split into
//! 5-bit chunks offset by 63, with 0x20 marking a continuation.

use std::{error::Error, fmt};

use model::GeoPoint;

const PRECISION: f64 = 1e5;
const CHUNK_OFFSET: u8 = 63;
const CONTINUATION_BIT: i64 = 0x20;
const CHUNK_MASK: i64 = 0x1f;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolylineError {
    /// A byte outside the `?`..`~` alphabet at the given position.
    InvalidCharacter(usize),
    /// The input ended in the middle of a value.
    Truncated,
    /// More continuation chunks than fit into a coordinate delta.
    Overflow(usize),
    /// The decoded coordinate at this index is not a valid WGS84 position.
    OutOfRange(usize),
}

impl Error for PolylineError {}

impl fmt::Display for PolylineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidCharacter(at) => write!(f, "invalid character at byte {}", at),
            Self::Truncated => write!(f, "polyline ends in the middle of a value"),
            Self::Overflow(at) => write!(f, "value starting at byte {} overflows", at),
            Self::OutOfRange(index) => write!(f, "point {} is out of range", index),
        }
    }
}

/// Reads one zig-zag encoded value starting at `*index` and advances it.
fn next_value(bytes: &[u8], index: &mut usize) -> Result<i64, PolylineError> {
    let start = *index;
    let mut result: i64 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*index).ok_or(PolylineError::Truncated)?;
        if !(CHUNK_OFFSET..=b'~').contains(&byte) {
            return Err(PolylineError::InvalidCharacter(*index));
        }
        if shift > 30 {
            return Err(PolylineError::Overflow(start));
        }
        let chunk = (byte - CHUNK_OFFSET) as i64;
        *index += 1;
        result |= (chunk & CHUNK_MASK) << shift;
        shift += 5;
        if chunk & CONTINUATION_BIT == 0 {
            break;
        }
    }
    Ok(if result & 1 != 0 { !(result >> 1) } else { result >> 1 })
}

/// Strict decoding: any malformed byte, truncated value or invalid coordinate
/// fails the whole polyline.
pub fn try_decode(encoded: &str) -> Result<Vec<GeoPoint>, PolylineError> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut index = 0;
    let (mut lat, mut lng) = (0i64, 0i64);
    while index < bytes.len() {
        lat += next_value(bytes, &mut index)?;
        lng += next_value(bytes, &mut index)?;
        let point = GeoPoint::checked(lat as f64 / PRECISION, lng as f64 / PRECISION)
            .ok_or(PolylineError::OutOfRange(points.len()))?;
        points.push(point);
    }
    Ok(points)
}

/// Lenient decoding used for rendering. Points that decode to invalid
/// coordinates are skipped (their deltas still accumulate); decoding stops at
/// the first malformed value and keeps what was read up to there.
pub fn decode(encoded: &str) -> Vec<GeoPoint> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut index = 0;
    let (mut lat, mut lng) = (0i64, 0i64);
    while index < bytes.len() {
        let delta = next_value(bytes, &mut index)
            .and_then(|d_lat| next_value(bytes, &mut index).map(|d_lng| (d_lat, d_lng)));
        let (d_lat, d_lng) = match delta {
            Ok(delta) => delta,
            Err(why) => {
                log::warn!("stopped decoding polyline after {} points: {}", points.len(), why);
                break;
            }
        };
        lat += d_lat;
        lng += d_lng;
        match GeoPoint::checked(lat as f64 / PRECISION, lng as f64 / PRECISION) {
            Some(point) => points.push(point),
            None => log::debug!("dropping out-of-range polyline point ({}, {})", lat, lng),
        }
    }
    points
}
