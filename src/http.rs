//! HTTP routing and reverse-geocoding collaborators.
//!
//! - [`HttpRouteProvider`] queries an OSRM-compatible `/route/v1` endpoint
//!   and returns the GeoJSON geometry as a polyline
//! - [`HttpGeocoder`] queries a Nominatim-compatible `/reverse` endpoint
//!
//! Both share one connection pool per instance and retry with exponential
//! backoff on 429.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::error::{Result, TrackerError};
use crate::route::{Geocoder, RouteProvider};
use crate::GeoPoint;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRIES: u32 = 3;
const USER_AGENT: &str = concat!("ride-tracker/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_OSRM_URL: &str = "https://router.project-osrm.org";
pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

/// Consecutive-429 counter driving the backoff.
struct Backoff {
    consecutive_429s: AtomicU32,
}

impl Backoff {
    fn new() -> Self {
        Self {
            consecutive_429s: AtomicU32::new(0),
        }
    }

    fn reset(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        // 1s, 2s, 4s, 8s...
        Duration::from_millis(500 * (1 << count.min(4)))
    }
}

fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| TrackerError::Http {
            message: format!("Failed to create HTTP client: {}", e),
            status_code: None,
        })
}

/// Send a request, retrying on 429. Non-success statuses become errors.
async fn send_with_retry(
    backoff: &Backoff,
    tag: &str,
    request: impl Fn() -> RequestBuilder,
) -> Result<Response> {
    let mut retries = 0;
    loop {
        let response = request().send().await.map_err(|e| TrackerError::Http {
            message: e.to_string(),
            status_code: e.status().map(|s| s.as_u16()),
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            retries += 1;
            if retries > MAX_RETRIES {
                return Err(TrackerError::Http {
                    message: "Max retries exceeded (429)".to_string(),
                    status_code: Some(status.as_u16()),
                });
            }
            let delay = backoff.record_429();
            warn!("[{}] 429, retry {} after {:?}", tag, retries, delay);
            tokio::time::sleep(delay).await;
            continue;
        }

        backoff.reset();
        if !status.is_success() {
            return Err(TrackerError::Http {
                message: format!("HTTP {}", status),
                status_code: Some(status.as_u16()),
            });
        }
        return Ok(response);
    }
}

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    #[serde(default)]
    distance: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    /// GeoJSON order: [lng, lat]
    coordinates: Vec<[f64; 2]>,
}

fn parse_osrm(body: OsrmResponse) -> Option<Vec<GeoPoint>> {
    if body.code != "Ok" {
        debug!("[HttpRouteProvider] Router answered {}", body.code);
        return None;
    }
    let route = body.routes.into_iter().next()?;
    let points: Vec<GeoPoint> = route
        .geometry
        .coordinates
        .into_iter()
        .map(|[lng, lat]| GeoPoint::new(lat, lng))
        .filter(|p| p.is_valid())
        .collect();
    info!(
        "[HttpRouteProvider] {} points, {:.0}m",
        points.len(),
        route.distance
    );
    (!points.is_empty()).then_some(points)
}

/// Driving routes from an OSRM server.
pub struct HttpRouteProvider {
    client: Client,
    base_url: String,
    profile: String,
    backoff: Backoff,
}

impl HttpRouteProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            profile: "driving".to_string(),
            backoff: Backoff::new(),
        })
    }

    /// Use another routing profile (e.g. `"car"` on self-hosted servers).
    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = profile.to_string();
        self
    }

    fn route_url(&self, origin: &GeoPoint, destination: &GeoPoint) -> String {
        format!(
            "{}/route/v1/{}/{},{};{},{}?overview=full&geometries=geojson",
            self.base_url,
            self.profile,
            origin.longitude,
            origin.latitude,
            destination.longitude,
            destination.latitude
        )
    }

    async fn fetch(&self, origin: GeoPoint, destination: GeoPoint) -> Result<Option<Vec<GeoPoint>>> {
        if !origin.is_valid() || !destination.is_valid() {
            return Err(TrackerError::InvalidCoordinates {
                message: "route endpoints must be valid coordinates".to_string(),
            });
        }
        let url = self.route_url(&origin, &destination);
        debug!("[HttpRouteProvider] GET {}", url);

        let response =
            send_with_retry(&self.backoff, "HttpRouteProvider", || self.client.get(&url)).await?;
        let body: OsrmResponse = response.json().await.map_err(|e| TrackerError::Http {
            message: format!("Invalid route response: {}", e),
            status_code: None,
        })?;
        Ok(parse_osrm(body))
    }
}

impl RouteProvider for HttpRouteProvider {
    fn get_route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> BoxFuture<'_, Result<Option<Vec<GeoPoint>>>> {
        self.fetch(origin, destination).boxed()
    }
}

// ============================================================================
// Reverse Geocoding
// ============================================================================

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    display_name: Option<String>,
    error: Option<String>,
}

/// Reverse geocoding through a Nominatim server.
pub struct HttpGeocoder {
    client: Client,
    base_url: String,
    language: Option<String>,
    backoff: Backoff,
}

impl HttpGeocoder {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            language: None,
            backoff: Backoff::new(),
        })
    }

    /// Preferred address language, sent as `accept-language`.
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    async fn lookup(&self, point: GeoPoint) -> Result<String> {
        if !point.is_valid() {
            return Err(TrackerError::InvalidCoordinates {
                message: format!("({}, {})", point.latitude, point.longitude),
            });
        }
        let url = format!(
            "{}/reverse?format=jsonv2&lat={}&lon={}",
            self.base_url, point.latitude, point.longitude
        );

        let response = send_with_retry(&self.backoff, "HttpGeocoder", || {
            let request = self.client.get(&url);
            match &self.language {
                Some(language) => request.header("Accept-Language", language.as_str()),
                None => request,
            }
        })
        .await?;

        let body: NominatimResponse = response.json().await.map_err(|e| TrackerError::Geocoding {
            message: format!("Invalid geocoder response: {}", e),
        })?;
        match (body.display_name, body.error) {
            (Some(name), _) if !name.trim().is_empty() => Ok(name),
            (_, Some(error)) => Err(TrackerError::Geocoding { message: error }),
            _ => Err(TrackerError::Geocoding {
                message: "empty address".to_string(),
            }),
        }
    }
}

impl Geocoder for HttpGeocoder {
    fn address_for(&self, point: GeoPoint) -> BoxFuture<'_, Result<String>> {
        self.lookup(point).boxed()
    }
}
