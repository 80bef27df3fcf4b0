//! Pace math (minutes per kilometer).
//!
//! Every function here returns 0.0 rather than NaN, infinity or a negative
//! number when the input cannot support a stable estimate.

use crate::geo_utils;
use crate::LocationSample;

/// Segment paces outside this range are treated as GPS jitter by
/// [`smoothed_pace`]. A world-class sprint is ~1.7 min/km.
pub const MIN_PLAUSIBLE_PACE: f64 = 1.0;
pub const MAX_PLAUSIBLE_PACE: f64 = 60.0;

/// Segments shorter than this are too noisy to produce a pace (meters).
const MIN_SEGMENT_DISTANCE: f64 = 0.5;

/// Minutes per kilometer for a distance covered in a duration.
pub fn pace_min_per_km(distance_meters: f64, elapsed_seconds: f64) -> f64 {
    if !(distance_meters > 0.0) || !(elapsed_seconds > 0.0) {
        return 0.0;
    }
    let pace = (elapsed_seconds / 60.0) / (distance_meters / 1000.0);
    if pace.is_finite() {
        pace
    } else {
        0.0
    }
}

/// Convert a speed in m/s into minutes per kilometer.
pub fn speed_to_pace(speed_mps: f64) -> f64 {
    pace_min_per_km(speed_mps, 1.0)
}

/// Pace across a contiguous run of samples, requiring at least
/// `min_elapsed_seconds` and `min_distance_meters` of data.
pub fn window_pace(samples: &[LocationSample], min_elapsed_seconds: f64, min_distance_meters: f64) -> f64 {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return 0.0;
    };
    if samples.len() < 2 {
        return 0.0;
    }
    let elapsed = (last.timestamp - first.timestamp) as f64 / 1000.0;
    let distance = geo_utils::path_distance(samples);
    if elapsed < min_elapsed_seconds || distance < min_distance_meters {
        return 0.0;
    }
    pace_min_per_km(distance, elapsed)
}

/// Whole-session pace from precomputed totals.
pub fn average_pace(total_distance_meters: f64, elapsed_ms: i64, min_distance_meters: f64) -> f64 {
    if total_distance_meters < min_distance_meters {
        return 0.0;
    }
    pace_min_per_km(total_distance_meters, elapsed_ms as f64 / 1000.0)
}

/// Rolling mean of the per-segment paces of the last `segment_count`
/// consecutive pairs in `samples`.
///
/// Segments with negligible distance or an implausible pace are skipped.
/// Returns 0.0 when no usable segment remains.
pub fn smoothed_pace(samples: &[LocationSample], segment_count: usize) -> f64 {
    if samples.len() < 2 || segment_count == 0 {
        return 0.0;
    }
    let start = samples.len().saturating_sub(segment_count + 1);
    let paces: Vec<f64> = samples[start..]
        .windows(2)
        .filter_map(|pair| {
            let distance = geo_utils::sample_distance(&pair[0], &pair[1]);
            let elapsed = (pair[1].timestamp - pair[0].timestamp) as f64 / 1000.0;
            if distance < MIN_SEGMENT_DISTANCE {
                return None;
            }
            let pace = pace_min_per_km(distance, elapsed);
            (MIN_PLAUSIBLE_PACE..=MAX_PLAUSIBLE_PACE)
                .contains(&pace)
                .then_some(pace)
        })
        .collect();

    if paces.is_empty() {
        return 0.0;
    }
    paces.iter().sum::<f64>() / paces.len() as f64
}
