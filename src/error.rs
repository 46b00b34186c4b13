//! Unified error handling for the ride-tracker library.
//!
//! Geometry functions never fail: malformed input degrades to a safe default
//! (`false`, `f64::INFINITY`, empty trail). Errors only surface at
//! construction time and at collaborator boundaries.

use std::fmt;

/// Unified error type for ride-tracker operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerError {
    /// A point has missing or out-of-range coordinates
    InvalidCoordinates { message: String },
    /// Service-area polygon is too small, open or self-intersecting
    InvalidPolygon {
        point_count: usize,
        message: String,
    },
    /// Routing collaborator failed or found no route
    RouteUnavailable { destination_key: String },
    /// HTTP/API error
    Http {
        message: String,
        status_code: Option<u16>,
    },
    /// Reverse geocoding failed
    Geocoding { message: String },
    /// Ride API rejected a requested side effect
    SideEffectRejected { effect: String, message: String },
    /// Configuration error
    ConfigError { message: String },
    /// The session event loop is no longer running
    SessionClosed,
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::InvalidCoordinates { message } => {
                write!(f, "Invalid coordinates: {}", message)
            }
            TrackerError::InvalidPolygon {
                point_count,
                message,
            } => {
                write!(
                    f,
                    "Invalid service area ({} points): {}",
                    point_count, message
                )
            }
            TrackerError::RouteUnavailable { destination_key } => {
                write!(f, "No route available to {}", destination_key)
            }
            TrackerError::Http {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "HTTP error ({}): {}", code, message)
                } else {
                    write!(f, "HTTP error: {}", message)
                }
            }
            TrackerError::Geocoding { message } => {
                write!(f, "Reverse geocoding failed: {}", message)
            }
            TrackerError::SideEffectRejected { effect, message } => {
                write!(f, "Side effect '{}' rejected: {}", effect, message)
            }
            TrackerError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            TrackerError::SessionClosed => write!(f, "Ride session is closed"),
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::ConfigError {
            message: err.to_string(),
        }
    }
}

/// Result type alias for ride-tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Extension trait for converting Option to TrackerError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a route-unavailable error.
    fn ok_or_no_route(self, destination_key: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_no_route(self, destination_key: &str) -> Result<T> {
        self.ok_or_else(|| TrackerError::RouteUnavailable {
            destination_key: destination_key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackerError::InvalidPolygon {
            point_count: 3,
            message: "needs at least 4 points".to_string(),
        };
        assert!(err.to_string().contains("3 points"));

        let err = TrackerError::Http {
            message: "timeout".to_string(),
            status_code: Some(504),
        };
        assert_eq!(err.to_string(), "HTTP error (504): timeout");
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_no_route("-1.29210,36.82190");
        assert!(matches!(
            result,
            Err(TrackerError::RouteUnavailable { .. })
        ));
        assert_eq!(Some(3).ok_or_no_route("unused"), Ok(3));
    }

    #[test]
    fn test_from_json_error() {
        let err: TrackerError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, TrackerError::ConfigError { .. }));
    }
}
