//! # Ride Tracker
//!
//! Live route-tracking and ride-lifecycle core for a ride-hailing client.
//!
//! This library provides:
//! - Service-area geofencing using an even-odd ray-casting test
//! - Route geometry tracking: fetch, progressive reveal, monotonic trimming
//!   and deviation-triggered re-routing
//! - Ride lifecycle state machines for the driver and rider roles, driven by
//!   absolute, server-stamped deadlines
//!
//! ## Features
//!
//! - **`http`** - Enable HTTP routing and reverse-geocoding collaborators
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use ride_tracker::{GeoPoint, ServiceAreaPolygon};
//!
//! let area = ServiceAreaPolygon::new(vec![
//!     GeoPoint::new(0.0, 0.0),
//!     GeoPoint::new(0.0, 1.0),
//!     GeoPoint::new(1.0, 1.0),
//!     GeoPoint::new(1.0, 0.0),
//!     GeoPoint::new(0.0, 0.0),
//! ])
//! .unwrap();
//!
//! assert!(area.contains(&GeoPoint::new(0.5, 0.5)));
//! assert!(!area.contains(&GeoPoint::new(2.0, 2.0)));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackerError};

// Geographic utilities (distance, projection, destination keys)
pub mod geo_utils;

// Tuned thresholds and delays
pub mod config;
pub use config::TrackerConfig;

// Injected time source
pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

// Service-area containment
pub mod geofence;
pub use geofence::{install_service_area, installed_service_area, is_inside, ServiceAreaPolygon};

// Route geometry: fetch, reveal, trim, deviation
pub mod route;
pub use route::{
    address_or_coordinates, Geocoder, RouteCommand, RouteCursor, RouteGeometryEngine,
    RouteProvider, RouteSnapshot, TrimResult,
};

// Ride lifecycle state machines
pub mod lifecycle;
pub use lifecycle::{
    active_target, boarding_timer, presentation_phase, ride_phase, Confirmation, DriverMachine,
    LifecycleTimer, PresentationPhase, RealtimeEvent, Ride, RidePatch, RideStatus, SideEffect,
    TimerKind,
};

// Event dispatcher owning one active ride session
pub mod session;
pub use session::{
    Collaborators, RealtimeLink, RideApi, RideSession, Role, SessionEvent, SessionHandle,
    TrackingSnapshot,
};

// HTTP collaborators for routing and reverse geocoding
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpGeocoder, HttpRouteProvider};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RideTracker"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A geographic coordinate in degrees.
///
/// # Example
/// ```
/// use ride_tracker::GeoPoint;
/// let point = GeoPoint::new(-1.2921, 36.8219); // Nairobi
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Best known instantaneous position of a party (self or counterparty).
///
/// Produced by an external location source at irregular intervals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub point: GeoPoint,
    /// Degrees clockwise from north
    pub heading: Option<f64>,
    /// Meters per second
    pub speed: Option<f64>,
    /// Horizontal accuracy radius in meters
    pub accuracy: Option<f64>,
    pub captured_at: Option<DateTime<Utc>>,
}

impl PositionSample {
    /// A bare sample with only a position.
    pub fn at(point: GeoPoint) -> Self {
        Self {
            point,
            heading: None,
            speed: None,
            accuracy: None,
            captured_at: None,
        }
    }

    /// Attach the capture timestamp.
    pub fn captured(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = Some(at);
        self
    }
}

/// Bounding box of a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from points.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Whether the point lies within the box (edges inclusive).
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(-1.2921, 36.8219).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_bounds() {
        let points = vec![
            GeoPoint::new(-1.30, 36.80),
            GeoPoint::new(-1.25, 36.85),
            GeoPoint::new(-1.28, 36.90),
        ];
        let bounds = Bounds::from_points(&points).unwrap();
        assert_eq!(bounds.min_lat, -1.30);
        assert_eq!(bounds.max_lng, 36.90);
        assert!(bounds.contains(&GeoPoint::new(-1.27, 36.82)));
        assert!(!bounds.contains(&GeoPoint::new(-1.20, 36.82)));
        assert!(Bounds::from_points(&[]).is_none());
    }

    #[test]
    fn test_position_sample_builder() {
        let now = Utc::now();
        let sample = PositionSample::at(GeoPoint::new(1.0, 2.0)).captured(now);
        assert_eq!(sample.captured_at, Some(now));
        assert!(sample.heading.is_none());
    }
}
