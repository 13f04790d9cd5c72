pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub const MAX_LATITUDE: f64 = 90.0;
pub const MAX_LONGITUDE: f64 = 180.0;

fn to_radians(degrees: f64) -> f64 {
    degrees * std::f64::consts::PI / 180.0
}

/// True if the pair is a finite WGS84 coordinate.
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-MAX_LATITUDE..=MAX_LATITUDE).contains(&latitude)
        && (-MAX_LONGITUDE..=MAX_LONGITUDE).contains(&longitude)
}

/// Rounds half away from zero to the given number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Formats a coordinate with a fixed number of decimals. Negative zero is
/// printed as `0` so that keys built from it stay stable.
pub fn format_fixed(value: f64, decimals: usize) -> String {
    let rounded = round_to(value, decimals as i32);
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.*}", decimals, rounded)
}

pub fn haversine_distance(
    latitude_1: f64,
    longitude_1: f64,
    latitude_2: f64,
    longitude_2: f64,
) -> f64 {
    let lat1_rad = to_radians(latitude_1);
    let lon1_rad = to_radians(longitude_1);
    let lat2_rad = to_radians(latitude_2);
    let lon2_rad = to_radians(longitude_2);

    let dlat = lat2_rad - lat1_rad;
    let dlon = lon2_rad - lon1_rad;

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Sum of the great-circle distances between consecutive `(lat, lng)` pairs.
pub fn path_length_km<I>(points: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut total = 0.0;
    let mut previous: Option<(f64, f64)> = None;
    for (lat, lng) in points {
        if let Some((prev_lat, prev_lng)) = previous {
            total += haversine_distance(prev_lat, prev_lng, lat, lng);
        }
        previous = Some((lat, lng));
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_ranges() {
        assert!(is_valid_coordinate(90.0, -180.0));
        assert!(!is_valid_coordinate(90.1, 0.0));
        assert!(!is_valid_coordinate(0.0, 180.5));
        assert!(!is_valid_coordinate(f64::NAN, 0.0));
    }

    #[test]
    fn fixed_format_normalizes_negative_zero() {
        assert_eq!(format_fixed(-0.0000001, 6), "0.000000");
        assert_eq!(format_fixed(12.3456789, 6), "12.345679");
    }

    #[test]
    fn path_length_of_one_degree_on_equator() {
        let km = path_length_km(vec![(0.0, 0.0), (0.0, 1.0)]);
        assert!((km - 111.19).abs() < 0.01);
        assert_eq!(path_length_km(vec![(1.0, 1.0)]), 0.0);
    }
}
