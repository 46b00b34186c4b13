//! R-tree over route vertices for off-route checks.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::geo_utils::haversine_distance;
use crate::GeoPoint;

/// A route vertex with its index, stored in a local equirectangular frame
/// (longitude scaled by the cosine of the route's mean latitude) so that
/// nearest-neighbour order matches ground distance.
#[derive(Debug, Clone, Copy)]
struct IndexedVertex {
    idx: usize,
    x: f64,
    y: f64,
}

impl RTreeObject for IndexedVertex {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.x, self.y])
    }
}

impl PointDistance for IndexedVertex {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.x - point[0];
        let dy = self.y - point[1];
        dx * dx + dy * dy
    }
}

/// Nearest-vertex index for one route polyline.
#[derive(Debug)]
pub struct VertexIndex {
    tree: RTree<IndexedVertex>,
    lng_scale: f64,
}

impl VertexIndex {
    /// Build an index over the polyline's vertices.
    pub fn build(polyline: &[GeoPoint]) -> Self {
        let mean_lat = if polyline.is_empty() {
            0.0
        } else {
            polyline.iter().map(|p| p.latitude).sum::<f64>() / polyline.len() as f64
        };
        let lng_scale = mean_lat.to_radians().cos();

        let vertices: Vec<IndexedVertex> = polyline
            .iter()
            .enumerate()
            .map(|(idx, p)| IndexedVertex {
                idx,
                x: p.longitude * lng_scale,
                y: p.latitude,
            })
            .collect();

        Self {
            tree: RTree::bulk_load(vertices),
            lng_scale,
        }
    }

    /// An index with no vertices.
    pub fn empty() -> Self {
        Self {
            tree: RTree::new(),
            lng_scale: 1.0,
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Index of the vertex nearest to `point`.
    pub fn nearest(&self, point: &GeoPoint) -> Option<usize> {
        if !point.latitude.is_finite() || !point.longitude.is_finite() {
            return None;
        }
        let query = [point.longitude * self.lng_scale, point.latitude];
        self.tree.nearest_neighbor(&query).map(|v| v.idx)
    }

    /// Ground distance from `point` to the nearest vertex, or
    /// `f64::INFINITY` when the index is empty or the point is malformed.
    pub fn nearest_distance(&self, point: &GeoPoint, polyline: &[GeoPoint]) -> f64 {
        self.nearest(point)
            .and_then(|idx| polyline.get(idx))
            .map(|v| haversine_distance(point, v))
            .unwrap_or(f64::INFINITY)
    }
}
