//! Routing and reverse-geocoding collaborators.
//!
//! Both are consumed through object-safe traits returning boxed futures so
//! the session can hold them as `Arc<dyn ...>` and spawn calls onto the
//! event loop.

use futures::future::BoxFuture;
use log::debug;

use crate::error::Result;
use crate::geo_utils::format_coordinates;
use crate::GeoPoint;

/// Origin/destination → road polyline.
///
/// `Ok(None)` and `Err(_)` are both treated as "no route" by the engine.
pub trait RouteProvider: Send + Sync {
    fn get_route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> BoxFuture<'_, Result<Option<Vec<GeoPoint>>>>;
}

/// Point → human-readable address.
pub trait Geocoder: Send + Sync {
    fn address_for(&self, point: GeoPoint) -> BoxFuture<'_, Result<String>>;
}

/// Reverse geocode a point, falling back to a formatted coordinate string
/// when the geocoder fails or returns a blank address.
pub async fn address_or_coordinates(geocoder: &dyn Geocoder, point: GeoPoint) -> String {
    match geocoder.address_for(point).await {
        Ok(address) if !address.trim().is_empty() => address,
        Ok(_) => format_coordinates(&point),
        Err(e) => {
            debug!("[Geocoder] Falling back to coordinates: {}", e);
            format_coordinates(&point)
        }
    }
}
