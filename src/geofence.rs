//! Service-area geofencing.
//!
//! Containment uses the even-odd rule: a horizontal ray is cast from the
//! point towards +∞ longitude and boundary crossings are counted. An odd
//! count means the point is inside. The test is O(n) in vertex count and
//! does not allocate, so it is safe to run on every position update.
//!
//! ## Example
//! ```rust
//! use ride_tracker::{GeoPoint, ServiceAreaPolygon};
//!
//! let json = "[[0,0],[0,2],[2,2],[2,0],[0,0]]";
//! let area = ServiceAreaPolygon::from_json(json).unwrap();
//! assert!(area.contains(&GeoPoint::new(1.0, 1.0)));
//! ```

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Coord, Line, LineString, Polygon};
use log::info;
use once_cell::sync::OnceCell;

use crate::error::{Result, TrackerError};
use crate::{Bounds, GeoPoint};

/// Minimum vertex count of a closed ring (triangle plus closing point).
const MIN_POLYGON_POINTS: usize = 4;

static SERVICE_AREA: OnceCell<ServiceAreaPolygon> = OnceCell::new();

/// Closed, simple polygon bounding the service area.
///
/// Invariants: at least 4 points, first point equals last, all coordinates
/// valid, no two non-adjacent edges intersect.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceAreaPolygon {
    points: Vec<GeoPoint>,
    bounds: Bounds,
}

impl ServiceAreaPolygon {
    /// Validate and build a polygon from a closed ring.
    pub fn new(points: Vec<GeoPoint>) -> Result<Self> {
        let count = points.len();
        let invalid = |message: &str| TrackerError::InvalidPolygon {
            point_count: count,
            message: message.to_string(),
        };

        if count < MIN_POLYGON_POINTS {
            return Err(invalid("needs at least 4 points"));
        }
        if points.iter().any(|p| !p.is_valid()) {
            return Err(invalid("contains invalid coordinates"));
        }
        if points.first() != points.last() {
            return Err(invalid("ring is not closed"));
        }
        if has_self_intersection(&points) {
            return Err(invalid("ring is self-intersecting"));
        }

        let bounds = Bounds::from_points(&points).ok_or_else(|| invalid("empty ring"))?;
        Ok(Self { points, bounds })
    }

    /// Parse a ring from a JSON array of `[lat, lng]` pairs.
    pub fn from_json(json: &str) -> Result<Self> {
        let pairs: Vec<[f64; 2]> = serde_json::from_str(json)?;
        Self::new(
            pairs
                .into_iter()
                .map(|[lat, lng]| GeoPoint::new(lat, lng))
                .collect(),
        )
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Whether the point lies inside the service area.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        if !point.latitude.is_finite() || !point.longitude.is_finite() {
            return false;
        }
        // Cheap reject before walking the ring
        if !self.bounds.contains(point) {
            return false;
        }
        is_inside(point, &self.points)
    }

    /// Convert to a `geo` polygon (x = longitude, y = latitude).
    pub fn to_geo_polygon(&self) -> Polygon<f64> {
        let ring: LineString<f64> = self
            .points
            .iter()
            .map(|p| Coord {
                x: p.longitude,
                y: p.latitude,
            })
            .collect();
        Polygon::new(ring, vec![])
    }
}

/// Even-odd containment test against a ring of points.
///
/// Longitude is treated as x and latitude as y. Missing (non-finite)
/// coordinates and rings with fewer than 3 points return `false`.
pub fn is_inside(point: &GeoPoint, polygon: &[GeoPoint]) -> bool {
    let x = point.longitude;
    let y = point.latitude;
    if !x.is_finite() || !y.is_finite() || polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = (polygon[i].longitude, polygon[i].latitude);
        let (xj, yj) = (polygon[j].longitude, polygon[j].latitude);

        // (yi > y) != (yj > y) guarantees yj != yi, so the division is safe
        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Check non-adjacent edges of a closed ring for intersections. O(n²),
/// only run once at load time.
fn has_self_intersection(ring: &[GeoPoint]) -> bool {
    let edges: Vec<Line<f64>> = ring
        .windows(2)
        .map(|w| {
            Line::new(
                Coord {
                    x: w[0].longitude,
                    y: w[0].latitude,
                },
                Coord {
                    x: w[1].longitude,
                    y: w[1].latitude,
                },
            )
        })
        .collect();
    let n = edges.len();

    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(edges[i], edges[j]) {
                None => {}
                Some(LineIntersection::Collinear { .. }) => return true,
                Some(LineIntersection::SinglePoint { .. }) if !adjacent => return true,
                Some(LineIntersection::SinglePoint { is_proper, .. }) => {
                    // Adjacent edges may only meet at their shared vertex
                    if is_proper {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Install the process-wide service area. Fails if one is already installed.
pub fn install_service_area(polygon: ServiceAreaPolygon) -> Result<()> {
    let count = polygon.points.len();
    SERVICE_AREA
        .set(polygon)
        .map_err(|_| TrackerError::ConfigError {
            message: "service area already installed".to_string(),
        })?;
    info!("[Geofence] Installed service area with {} points", count);
    Ok(())
}

/// The process-wide service area, if one has been installed.
pub fn installed_service_area() -> Option<&'static ServiceAreaPolygon> {
    SERVICE_AREA.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Contains;

    fn square() -> ServiceAreaPolygon {
        ServiceAreaPolygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(1.0, 0.0),
            GeoPoint::new(0.0, 0.0),
        ])
        .unwrap()
    }

    /// Concave "U" shape opening to the north.
    fn u_shape() -> ServiceAreaPolygon {
        ServiceAreaPolygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(3.0, 0.0),
            GeoPoint::new(3.0, 1.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(1.0, 2.0),
            GeoPoint::new(3.0, 2.0),
            GeoPoint::new(3.0, 3.0),
            GeoPoint::new(0.0, 3.0),
            GeoPoint::new(0.0, 0.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_inside_and_outside() {
        let area = square();
        assert!(area.contains(&GeoPoint::new(0.5, 0.5)));
        assert!(area.contains(&GeoPoint::new(0.01, 0.99)));
        assert!(!area.contains(&GeoPoint::new(1.5, 0.5)));
        assert!(!area.contains(&GeoPoint::new(-40.0, 170.0)));
    }

    #[test]
    fn test_concave_notch_is_outside() {
        let area = u_shape();
        assert!(area.contains(&GeoPoint::new(0.5, 1.5)));
        assert!(area.contains(&GeoPoint::new(2.5, 0.5)));
        // Inside the bounding box but in the notch
        assert!(!area.contains(&GeoPoint::new(2.0, 1.5)));
    }

    #[test]
    fn test_degenerate_input_is_false() {
        let area = square();
        assert!(!area.contains(&GeoPoint::new(f64::NAN, 0.5)));
        assert!(!area.contains(&GeoPoint::new(0.5, f64::INFINITY)));
        assert!(!is_inside(&GeoPoint::new(0.5, 0.5), &[]));
    }

    #[test]
    fn test_matches_geo_contains() {
        let area = u_shape();
        let poly = area.to_geo_polygon();
        for i in 0..30 {
            for j in 0..30 {
                let p = GeoPoint::new(i as f64 * 0.1 + 0.05, j as f64 * 0.1 + 0.05);
                let expected = poly.contains(&geo::Point::new(p.longitude, p.latitude));
                assert_eq!(area.contains(&p), expected, "mismatch at {:?}", p);
            }
        }
    }

    #[test]
    fn test_rejects_invalid_rings() {
        // Too few points
        assert!(ServiceAreaPolygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(0.0, 0.0),
        ])
        .is_err());

        // Not closed
        assert!(ServiceAreaPolygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(1.0, 0.0),
        ])
        .is_err());

        // Bow-tie
        let err = ServiceAreaPolygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(1.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(0.0, 0.0),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("self-intersecting"));
    }

    #[test]
    fn test_from_json() {
        let area = ServiceAreaPolygon::from_json("[[0,0],[0,1],[1,1],[1,0],[0,0]]").unwrap();
        assert_eq!(area.points().len(), 5);
        assert_eq!(area.bounds().max_lat, 1.0);
        assert!(ServiceAreaPolygon::from_json("{}").is_err());
    }

    #[test]
    fn test_install_once() {
        install_service_area(square()).unwrap();
        assert!(install_service_area(square()).is_err());
        let installed = installed_service_area().unwrap();
        assert!(installed.contains(&GeoPoint::new(0.5, 0.5)));
    }
}
