//! Geographic utilities: great-circle distance and path length.
//!
//! These are pure functions with no session state, so they serve both the
//! engine's running accumulation and standalone callers.

use crate::LocationSample;

/// Earth radius used by the Haversine formula, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates in meters (Haversine).
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Clamp guards against a > 1.0 from rounding on antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_METERS * c
}

/// Distance in meters between two samples.
pub fn sample_distance(a: &LocationSample, b: &LocationSample) -> f64 {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Total path length in meters: the sum of the distance between every
/// consecutive pair. Zero for fewer than two samples.
pub fn path_distance(samples: &[LocationSample]) -> f64 {
    samples
        .windows(2)
        .map(|pair| sample_distance(&pair[0], &pair[1]))
        .sum()
}

/// Approximate degrees of latitude spanned by `meters`.
pub fn meters_to_degrees(meters: f64) -> f64 {
    (meters / EARTH_RADIUS_METERS).to_degrees()
}

/// True when both components are finite and inside [-90,90] / [-180,180].
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lat: f64, lng: f64, ts: i64) -> LocationSample {
        LocationSample::new(lat, lng, ts)
    }

    #[test]
    fn test_identical_points_zero() {
        let p = sample(51.5074, -0.1278, 0);
        let q = sample(51.5074, -0.1278, 1000);
        assert_eq!(path_distance(&[p, q]), 0.0);
    }

    #[test]
    fn test_empty_and_single() {
        assert_eq!(path_distance(&[]), 0.0);
        assert_eq!(path_distance(&[sample(10.0, 10.0, 0)]), 0.0);
    }

    #[test]
    fn test_one_degree_longitude_at_equator() {
        let dist = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_195.0).abs() < 10.0);
    }

    #[test]
    fn test_reverse_preserves_distance() {
        let path: Vec<LocationSample> = vec![
            sample(40.0, -74.0, 0),
            sample(40.001, -74.002, 1000),
            sample(40.003, -73.999, 2000),
            sample(39.998, -74.001, 3000),
        ];
        let mut reversed = path.clone();
        reversed.reverse();
        assert!((path_distance(&path) - path_distance(&reversed)).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_points() {
        // 0.001 degrees of latitude is ~111 m
        let path: Vec<LocationSample> = (0..4)
            .map(|i| sample(51.0 + i as f64 * 0.001, 0.0, i * 1000))
            .collect();
        let total = path_distance(&path);
        assert!((total - 333.0).abs() < 10.0, "got {total}");
    }

    #[test]
    fn test_meters_to_degrees_round_trip() {
        let deg = meters_to_degrees(111.195);
        assert!((deg - 0.001).abs() < 1e-6);
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(is_valid_coordinate(90.0, 180.0));
        assert!(is_valid_coordinate(-90.0, -180.0));
        assert!(!is_valid_coordinate(90.1, 0.0));
        assert!(!is_valid_coordinate(0.0, -180.5));
        assert!(!is_valid_coordinate(f64::NAN, 0.0));
    }
}
