//! Route geometry: fetching, progressive reveal, monotonic trimming and
//! deviation detection for the route toward the active target.

pub mod engine;
pub mod index;
pub mod provider;
pub mod reveal;
pub mod trim;

pub use engine::{RouteCommand, RouteGeometryEngine, RouteSnapshot};
pub use index::VertexIndex;
pub use provider::{address_or_coordinates, Geocoder, RouteProvider};
pub use reveal::RevealAnimation;
pub use trim::{trim_polyline, RouteCursor, TrimResult};
