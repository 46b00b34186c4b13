//! Monotonic trimming of a route polyline behind the mover.
//!
//! The closest vertex is searched only forward from the cursor, within a
//! bounded window. The mover is then snapped onto whichever adjacent segment
//! is nearer, and the visible trail starts exactly at that snapped point.

use serde::{Deserialize, Serialize};

use crate::geo_utils::{haversine_distance, project_onto_segment, SegmentProjection};
use crate::GeoPoint;

/// Progress marker into the current route polyline.
///
/// `last_passed_index` never decreases while the destination is unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteCursor {
    pub last_passed_index: usize,
    /// Position used for the most recent trim
    pub last_origin: Option<GeoPoint>,
}

impl RouteCursor {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Outcome of a single trim.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimResult {
    /// Snapped position followed by the remaining route vertices
    pub trail: Vec<GeoPoint>,
    /// Start index of the segment the mover was snapped onto
    pub segment_start: usize,
    pub projection: SegmentProjection,
}

/// Trim `polyline` at `position`, advancing `cursor`.
///
/// Returns `None` (leaving the cursor untouched) for polylines shorter than
/// two points or positions with non-finite coordinates.
pub fn trim_polyline(
    polyline: &[GeoPoint],
    cursor: &mut RouteCursor,
    position: &GeoPoint,
    window: usize,
) -> Option<TrimResult> {
    let len = polyline.len();
    if len < 2 || !position.latitude.is_finite() || !position.longitude.is_finite() {
        return None;
    }

    let start = cursor.last_passed_index.min(len - 1);
    let end = start.saturating_add(window.max(1)).min(len);

    // Forward-only scan for the nearest vertex
    let mut closest = start;
    let mut closest_dist = f64::INFINITY;
    for (offset, vertex) in polyline[start..end].iter().enumerate() {
        let d = haversine_distance(position, vertex);
        if d < closest_dist {
            closest_dist = d;
            closest = start + offset;
        }
    }

    // Candidate segments: (closest-1, closest) if it does not reach behind
    // the cursor, and (closest, closest+1) if one exists.
    let previous = (closest > start).then(|| {
        (
            closest - 1,
            project_onto_segment(position, &polyline[closest - 1], &polyline[closest]),
        )
    });
    let next = (closest + 1 < len).then(|| {
        (
            closest,
            project_onto_segment(position, &polyline[closest], &polyline[closest + 1]),
        )
    });

    let (segment_start, projection) = match (previous, next) {
        (Some(prev), Some(next)) => {
            // Ties go forward
            if next.1.distance <= prev.1.distance {
                next
            } else {
                prev
            }
        }
        (Some(prev), None) => prev,
        (None, Some(next)) => next,
        (None, None) => {
            // Cursor sits on the final vertex
            let last = polyline[len - 1];
            (
                len - 1,
                SegmentProjection {
                    point: last,
                    t: 0.0,
                    distance: haversine_distance(position, &last),
                },
            )
        }
    };

    cursor.last_passed_index = cursor.last_passed_index.max(segment_start);
    cursor.last_origin = Some(*position);

    let mut trail = Vec::with_capacity(len - segment_start);
    trail.push(projection.point);
    if segment_start + 1 < len {
        trail.extend_from_slice(&polyline[segment_start + 1..]);
    }

    Some(TrimResult {
        trail,
        segment_start,
        projection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ten points, ~111m apart, heading east along the equator.
    fn straight_line() -> Vec<GeoPoint> {
        (0..10).map(|i| GeoPoint::new(0.0, i as f64 * 0.001)).collect()
    }

    #[test]
    fn test_position_on_fifth_segment() {
        let line = straight_line();
        let mut cursor = RouteCursor::default();
        // Midway along segment 4 -> 5
        let position = GeoPoint::new(0.0, 0.0045);

        let result = trim_polyline(&line, &mut cursor, &position, 100).unwrap();

        assert_eq!(result.segment_start, 4);
        assert!(result.projection.t >= 0.0 && result.projection.t <= 1.0);
        assert!((result.projection.t - 0.5).abs() < 1e-9);
        assert_eq!(result.trail.len(), 10 - 5 + 1);
        assert_eq!(result.trail[1], line[5]);
        assert_eq!(cursor.last_passed_index, 4);
        assert_eq!(cursor.last_origin, Some(position));
    }

    #[test]
    fn test_projection_prefix_is_snapped() {
        let line = straight_line();
        let mut cursor = RouteCursor::default();
        // 10m north of the road, a quarter of the way along segment 2 -> 3
        let position = GeoPoint::new(0.00009, 0.00225);

        let result = trim_polyline(&line, &mut cursor, &position, 100).unwrap();
        assert_eq!(result.segment_start, 2);
        assert!(result.trail[0].latitude.abs() < 1e-12);
        assert!((result.trail[0].longitude - 0.00225).abs() < 1e-9);
        assert!((result.projection.distance - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_never_moves_backward() {
        let line = straight_line();
        let mut cursor = RouteCursor::default();

        trim_polyline(&line, &mut cursor, &GeoPoint::new(0.0, 0.0065), 100).unwrap();
        assert_eq!(cursor.last_passed_index, 6);

        // GPS jumps back toward the start
        let result = trim_polyline(&line, &mut cursor, &GeoPoint::new(0.0, 0.0015), 100).unwrap();
        assert_eq!(cursor.last_passed_index, 6);
        assert!(result.segment_start >= 6);
        // Nothing behind the cursor is rendered
        assert_eq!(result.trail.len(), 10 - 7 + 1);
    }

    #[test]
    fn test_monotonic_over_noisy_sequence() {
        let line = straight_line();
        let mut cursor = RouteCursor::default();
        let lngs = [0.0003, 0.0012, 0.0009, 0.0031, 0.0024, 0.0058, 0.0041, 0.0089, 0.0012];
        let mut previous = 0;
        for lng in lngs {
            trim_polyline(&line, &mut cursor, &GeoPoint::new(0.00002, lng), 100);
            assert!(cursor.last_passed_index >= previous);
            previous = cursor.last_passed_index;
        }
    }

    #[test]
    fn test_window_bounds_scan() {
        let line = straight_line();
        let mut cursor = RouteCursor::default();
        // Far along the route but window only covers vertices 0..3
        let result = trim_polyline(&line, &mut cursor, &GeoPoint::new(0.0, 0.0085), 3).unwrap();
        assert_eq!(result.segment_start, 2);
        assert_eq!(cursor.last_passed_index, 2);
    }

    #[test]
    fn test_at_final_vertex() {
        let line = straight_line();
        let mut cursor = RouteCursor {
            last_passed_index: 9,
            last_origin: None,
        };
        let result = trim_polyline(&line, &mut cursor, &GeoPoint::new(0.0, 0.0095), 100).unwrap();
        assert_eq!(result.trail, vec![line[9]]);
        assert_eq!(cursor.last_passed_index, 9);
    }

    #[test]
    fn test_malformed_input() {
        let line = straight_line();
        let mut cursor = RouteCursor::default();
        assert!(trim_polyline(&line, &mut cursor, &GeoPoint::new(f64::NAN, 0.0), 100).is_none());
        assert!(trim_polyline(&line[..1], &mut cursor, &GeoPoint::new(0.0, 0.0), 100).is_none());
        assert_eq!(cursor, RouteCursor::default());
    }
}
