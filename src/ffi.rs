//! FFI bindings for mobile platforms (iOS/Android).
//!
//! Exposes the geofence, the rider/driver phase derivation and a shared
//! route geometry engine to Kotlin and Swift. The host app performs the
//! network calls itself: `tracker_*` functions return the engine's
//! commands, and fetched routes are handed back through
//! [`tracker_on_route_fetched`]. Timestamps cross the boundary as Unix
//! milliseconds. All free functions are prefixed with `ffi_` or `tracker_`.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{info, warn};
use once_cell::sync::Lazy;

use crate::config::TrackerConfig;
use crate::geo_utils::haversine_distance;
use crate::geofence::{install_service_area, installed_service_area, is_inside, ServiceAreaPolygon};
use crate::lifecycle::{presentation_phase, PresentationPhase, RideStatus};
use crate::route::{RouteCommand, RouteGeometryEngine};
use crate::{init_logging, GeoPoint};

// ============================================================================
// Geofence
// ============================================================================

/// Install the process-wide service area. Returns false if the polygon is
/// invalid or an area is already installed.
#[uniffi::export]
pub fn ffi_install_service_area(points: Vec<GeoPoint>) -> bool {
    init_logging();
    let result = ServiceAreaPolygon::new(points).and_then(install_service_area);
    if let Err(e) = &result {
        warn!("[RideTracker] Service area not installed: {}", e);
    }
    result.is_ok()
}

/// Whether the point lies in the installed service area. False when none is
/// installed.
#[uniffi::export]
pub fn ffi_is_inside_service_area(point: GeoPoint) -> bool {
    installed_service_area().is_some_and(|area| area.contains(&point))
}

/// Even-odd containment against an arbitrary ring.
#[uniffi::export]
pub fn ffi_is_inside(point: GeoPoint, polygon: Vec<GeoPoint>) -> bool {
    is_inside(&point, &polygon)
}

/// Great-circle distance in meters.
#[uniffi::export]
pub fn ffi_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    haversine_distance(&a, &b)
}

// ============================================================================
// Lifecycle
// ============================================================================

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Delays of the shared tracker, so phases agree with [`tracker_configure`].
fn tracker_config() -> TrackerConfig {
    with_tracker(|t| t.config().clone())
}

/// Presentation phase at `now_ms` with the tracker's configured delays.
#[uniffi::export]
pub fn ffi_presentation_phase(
    status: RideStatus,
    arrived_at_ms: Option<i64>,
    now_ms: i64,
) -> Option<PresentationPhase> {
    let now = from_millis(now_ms)?;
    let arrived_at = arrived_at_ms.and_then(from_millis);
    presentation_phase(status, arrived_at, now, &tracker_config())
}

/// Instant (Unix ms) at which a ride that arrived at `arrived_at_ms` starts.
/// `None` if that instant is not representable.
#[uniffi::export]
pub fn ffi_auto_start_at_ms(arrived_at_ms: i64) -> Option<i64> {
    let delay = tracker_config().boarding_total_delay().num_milliseconds();
    arrived_at_ms.checked_add(delay)
}

// ============================================================================
// Shared Route Tracker
// ============================================================================

/// Command for the host app, mirroring [`RouteCommand`].
#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum FfiRouteCommand {
    Fetch {
        request_id: u64,
        destination_key: String,
        origin: GeoPoint,
        destination: GeoPoint,
    },
    StartReveal {
        interval_ms: u64,
    },
    StopReveal,
}

impl From<RouteCommand> for FfiRouteCommand {
    fn from(command: RouteCommand) -> Self {
        match command {
            RouteCommand::Fetch {
                request_id,
                destination_key,
                origin,
                destination,
            } => FfiRouteCommand::Fetch {
                request_id,
                destination_key,
                origin,
                destination,
            },
            RouteCommand::StartReveal { interval } => FfiRouteCommand::StartReveal {
                interval_ms: interval.as_millis() as u64,
            },
            RouteCommand::StopReveal => FfiRouteCommand::StopReveal,
        }
    }
}

static TRACKER: Lazy<Mutex<RouteGeometryEngine>> =
    Lazy::new(|| Mutex::new(RouteGeometryEngine::new(TrackerConfig::default())));

fn with_tracker<F, R>(f: F) -> R
where
    F: FnOnce(&mut RouteGeometryEngine) -> R,
{
    let mut tracker = TRACKER.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut tracker)
}

fn convert(commands: Vec<RouteCommand>) -> Vec<FfiRouteCommand> {
    commands.into_iter().map(FfiRouteCommand::from).collect()
}

/// Replace the shared tracker with one using `config_json`. Returns false
/// and keeps the current tracker if the config is invalid.
#[uniffi::export]
pub fn tracker_configure(config_json: String) -> bool {
    init_logging();
    match TrackerConfig::from_json(&config_json) {
        Ok(config) => {
            with_tracker(|t| *t = RouteGeometryEngine::new(config));
            info!("[RideTracker] Tracker reconfigured");
            true
        }
        Err(e) => {
            warn!("[RideTracker] Rejected config: {}", e);
            false
        }
    }
}

#[uniffi::export]
pub fn tracker_update_target(
    origin: Option<GeoPoint>,
    target: Option<GeoPoint>,
) -> Vec<FfiRouteCommand> {
    convert(with_tracker(|t| t.update_target(origin, target)))
}

/// Deliver a fetched route. `None` means the routing call failed or found
/// no route.
#[uniffi::export]
pub fn tracker_on_route_fetched(
    request_id: u64,
    destination_key: String,
    points: Option<Vec<GeoPoint>>,
) -> Vec<FfiRouteCommand> {
    convert(with_tracker(|t| {
        t.on_route_fetched(request_id, &destination_key, Ok(points))
    }))
}

#[uniffi::export]
pub fn tracker_reveal_tick() -> Vec<FfiRouteCommand> {
    convert(with_tracker(|t| t.reveal_tick()))
}

#[uniffi::export]
pub fn tracker_visible_trail() -> Vec<GeoPoint> {
    with_tracker(|t| t.visible_trail().to_vec())
}

#[uniffi::export]
pub fn tracker_remaining_distance() -> f64 {
    with_tracker(|t| t.remaining_distance())
}

/// Full engine snapshot as JSON.
#[uniffi::export]
pub fn tracker_snapshot_json() -> String {
    with_tracker(|t| serde_json::to_string(&t.snapshot()).unwrap_or_else(|_| "{}".to_string()))
}

#[uniffi::export]
pub fn tracker_clear() -> Vec<FfiRouteCommand> {
    convert(with_tracker(|t| t.clear()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // The shared tracker is process-wide; keep every test touching it in one
    #[test]
    fn test_phase_follows_tracker_config() {
        let arrived = 1_700_000_000_000;
        assert!(tracker_configure("{}".to_string()));
        assert_eq!(
            ffi_presentation_phase(RideStatus::Accepted, Some(arrived), arrived + 1_000),
            Some(PresentationPhase::Arrived)
        );
        assert_eq!(
            ffi_presentation_phase(RideStatus::Accepted, Some(arrived), arrived + 60_000),
            Some(PresentationPhase::Boarding)
        );
        assert_eq!(ffi_auto_start_at_ms(arrived), Some(arrived + 80_000));

        let custom = r#"{"boarding_display_delay_ms": 30000, "boarding_grace_delay_ms": 10000}"#;
        assert!(tracker_configure(custom.to_string()));
        assert_eq!(
            ffi_presentation_phase(RideStatus::Accepted, Some(arrived), arrived + 30_000),
            Some(PresentationPhase::Boarding)
        );
        assert_eq!(ffi_auto_start_at_ms(arrived), Some(arrived + 40_000));

        // Overflow is reported, not a panic across the boundary
        assert_eq!(ffi_auto_start_at_ms(i64::MAX - 1_000), None);

        assert!(tracker_configure("{}".to_string()));
    }

    #[test]
    fn test_command_conversion() {
        let command = FfiRouteCommand::from(RouteCommand::StartReveal {
            interval: std::time::Duration::from_millis(16),
        });
        assert_eq!(command, FfiRouteCommand::StartReveal { interval_ms: 16 });
    }
}
