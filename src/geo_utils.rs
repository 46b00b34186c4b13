//! Geographic utilities: great-circle distance, segment projection and
//! destination keys.
//!
//! All functions fail soft on malformed input: distances become
//! `f64::INFINITY` and projections report an infinite distance.

use crate::GeoPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (approximate).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Great-circle distance between two points in meters.
///
/// Returns `f64::INFINITY` if either point is not finite.
///
/// # Example
/// ```
/// use ride_tracker::GeoPoint;
/// use ride_tracker::geo_utils::haversine_distance;
///
/// let a = GeoPoint::new(0.0, 0.0);
/// let b = GeoPoint::new(0.0, 0.001);
/// let d = haversine_distance(&a, &b);
/// assert!((d - 111.2).abs() < 0.5);
/// ```
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    if !a.latitude.is_finite()
        || !a.longitude.is_finite()
        || !b.latitude.is_finite()
        || !b.longitude.is_finite()
    {
        return f64::INFINITY;
    }

    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlng = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Total length of a polyline in meters.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .filter(|d| d.is_finite())
        .sum()
}

/// Convert a distance in meters to approximate degrees of latitude.
pub fn meters_to_degrees(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}

/// Minimum distance from `point` to any vertex of `polyline`.
///
/// Returns `f64::INFINITY` for an empty polyline.
pub fn min_vertex_distance(point: &GeoPoint, polyline: &[GeoPoint]) -> f64 {
    polyline
        .iter()
        .map(|p| haversine_distance(point, p))
        .fold(f64::INFINITY, f64::min)
}

/// Orthogonal projection of a point onto a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentProjection {
    /// Projected point, always on the segment
    pub point: GeoPoint,
    /// Interpolation parameter, clamped to [0, 1]
    pub t: f64,
    /// Distance from the query point to the projection in meters
    pub distance: f64,
}

/// Project `point` onto the segment `a`-`b`.
///
/// Uses a local equirectangular frame (longitude scaled by the cosine of the
/// query latitude) so the projection is orthogonal in meters rather than in
/// raw degrees. `t` is clamped so the result never leaves the segment; a
/// zero-length segment projects onto `a`.
pub fn project_onto_segment(point: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> SegmentProjection {
    let scale = point.latitude.to_radians().cos();

    let ax = a.longitude * scale;
    let ay = a.latitude;
    let bx = b.longitude * scale;
    let by = b.latitude;
    let px = point.longitude * scale;
    let py = point.latitude;

    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;

    let t = if len_sq > 0.0 && len_sq.is_finite() {
        (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    // NaN input survives clamp; pin it to the segment start
    let t = if t.is_nan() { 0.0 } else { t };

    let projected = GeoPoint::new(
        a.latitude + t * (b.latitude - a.latitude),
        a.longitude + t * (b.longitude - a.longitude),
    );

    SegmentProjection {
        point: projected,
        t,
        distance: haversine_distance(point, &projected),
    }
}

/// Quantized "lat,lng" key used to detect a change of routing target.
///
/// # Example
/// ```
/// use ride_tracker::GeoPoint;
/// use ride_tracker::geo_utils::destination_key;
///
/// let key = destination_key(&GeoPoint::new(-1.292066, 36.821949), 5);
/// assert_eq!(key, "-1.29207,36.82195");
/// ```
pub fn destination_key(point: &GeoPoint, precision: usize) -> String {
    format!(
        "{:.*},{:.*}",
        precision, point.latitude, precision, point.longitude
    )
}

/// Human-readable coordinate string, used when reverse geocoding fails.
pub fn format_coordinates(point: &GeoPoint) -> String {
    format!("{:.5}, {:.5}", point.latitude, point.longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is ~111.2km
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        let d = haversine_distance(&a, &b);
        assert!((d - 111_195.0).abs() < 100.0, "got {}", d);
        assert_eq!(haversine_distance(&a, &a), 0.0);
    }

    #[test]
    fn test_haversine_nan_is_infinite() {
        let a = GeoPoint::new(f64::NAN, 0.0);
        let b = GeoPoint::new(0.0, 0.0);
        assert_eq!(haversine_distance(&a, &b), f64::INFINITY);
        assert_eq!(min_vertex_distance(&b, &[]), f64::INFINITY);
    }

    #[test]
    fn test_polyline_length() {
        let line: Vec<GeoPoint> = (0..5).map(|i| GeoPoint::new(0.0, i as f64 * 0.001)).collect();
        let len = polyline_length(&line);
        assert!((len - 444.8).abs() < 1.0, "got {}", len);
        assert_eq!(polyline_length(&line[..1]), 0.0);
    }

    #[test]
    fn test_projection_clamps_to_segment() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 0.001);

        let before = project_onto_segment(&GeoPoint::new(0.0, -0.001), &a, &b);
        assert_eq!(before.t, 0.0);
        assert_eq!(before.point, a);

        let after = project_onto_segment(&GeoPoint::new(0.0, 0.002), &a, &b);
        assert_eq!(after.t, 1.0);
        assert_eq!(after.point, b);
    }

    #[test]
    fn test_projection_midpoint() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 0.002);
        let proj = project_onto_segment(&GeoPoint::new(0.0001, 0.001), &a, &b);
        assert!((proj.t - 0.5).abs() < 1e-9);
        assert!(proj.point.latitude.abs() < 1e-12);
        assert!((proj.distance - 11.1).abs() < 0.2, "got {}", proj.distance);
    }

    #[test]
    fn test_projection_degenerate_segment() {
        let a = GeoPoint::new(1.0, 1.0);
        let proj = project_onto_segment(&GeoPoint::new(1.0, 1.001), &a, &a);
        assert_eq!(proj.t, 0.0);
        assert_eq!(proj.point, a);
    }

    #[test]
    fn test_destination_key_precision() {
        let p = GeoPoint::new(51.5074, -0.1278);
        assert_eq!(destination_key(&p, 5), "51.50740,-0.12780");
        assert_eq!(destination_key(&p, 2), "51.51,-0.13");
        assert_eq!(format_coordinates(&p), "51.50740, -0.12780");
    }
}
