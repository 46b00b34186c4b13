//! Tuned thresholds and delays for route tracking and the ride lifecycle.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Upper bound for every configured delay and age: one day.
pub const MAX_DELAY_MS: i64 = 86_400_000;

/// Configuration for the route geometry engine and lifecycle machines.
///
/// Both rider and driver clients must run with the same boarding delays,
/// otherwise their boarding phases will not line up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Distance from the nearest route vertex beyond which the mover is
    /// considered off-route and the route is re-fetched.
    /// Default: 60.0 meters
    pub deviation_threshold_m: f64,

    /// Minimum movement since the last trim before trimming again.
    /// Default: 2.0 meters (below GPS jitter)
    pub trim_threshold_m: f64,

    /// Number of vertices scanned forward from the cursor when trimming.
    /// Default: 100
    pub trim_window: usize,

    /// Total duration of the progressive reveal of a fresh route.
    /// Default: 900 ms
    pub reveal_duration_ms: u64,

    /// Interval between reveal frames.
    /// Default: 16 ms (~60fps)
    pub reveal_tick_ms: u64,

    /// Decimal places used when quantizing a target into a destination key.
    /// Default: 5 (~1.1 m)
    pub destination_key_precision: usize,

    /// Driver-to-pickup distance that stamps arrival.
    /// Default: 30.0 meters
    pub pickup_radius_m: f64,

    /// Driver-to-destination distance that completes the ride.
    /// Default: 30.0 meters
    pub dropoff_radius_m: f64,

    /// How long the "arrived" state is shown before boarding begins.
    /// Default: 60000 ms
    pub boarding_display_delay_ms: i64,

    /// Passenger loading time after boarding begins before the ride starts.
    /// Default: 20000 ms
    pub boarding_grace_delay_ms: i64,

    /// Maximum age of a position sample for it to trigger auto-connect.
    /// Default: 60000 ms
    pub fresh_position_max_age_ms: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            deviation_threshold_m: 60.0,
            trim_threshold_m: 2.0,
            trim_window: 100,
            reveal_duration_ms: 900,
            reveal_tick_ms: 16,
            destination_key_precision: 5,
            pickup_radius_m: 30.0,
            dropoff_radius_m: 30.0,
            boarding_display_delay_ms: 60_000,
            boarding_grace_delay_ms: 20_000,
            fresh_position_max_age_ms: 60_000,
        }
    }
}

impl TrackerConfig {
    /// Load a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Example
    /// ```
    /// use ride_tracker::TrackerConfig;
    ///
    /// let config = TrackerConfig::from_json(r#"{"pickup_radius_m": 50.0}"#).unwrap();
    /// assert_eq!(config.pickup_radius_m, 50.0);
    /// assert_eq!(config.dropoff_radius_m, 30.0);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or misfire the machines.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("deviation_threshold_m", self.deviation_threshold_m),
            ("pickup_radius_m", self.pickup_radius_m),
            ("dropoff_radius_m", self.dropoff_radius_m),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(TrackerError::ConfigError {
                    message: format!("{} must be positive, got {}", name, value),
                });
            }
        }
        if !(self.trim_threshold_m.is_finite() && self.trim_threshold_m >= 0.0) {
            return Err(TrackerError::ConfigError {
                message: format!(
                    "trim_threshold_m must be non-negative, got {}",
                    self.trim_threshold_m
                ),
            });
        }
        if self.trim_window == 0 {
            return Err(TrackerError::ConfigError {
                message: "trim_window must be at least 1".to_string(),
            });
        }
        if self.reveal_tick_ms == 0 {
            return Err(TrackerError::ConfigError {
                message: "reveal_tick_ms must be at least 1".to_string(),
            });
        }
        let delays = [
            ("boarding_display_delay_ms", self.boarding_display_delay_ms),
            ("boarding_grace_delay_ms", self.boarding_grace_delay_ms),
            ("fresh_position_max_age_ms", self.fresh_position_max_age_ms),
        ];
        for (name, value) in delays {
            if !(0..=MAX_DELAY_MS).contains(&value) {
                return Err(TrackerError::ConfigError {
                    message: format!("{} must be within 0..={}, got {}", name, MAX_DELAY_MS, value),
                });
            }
        }
        Ok(())
    }

    /// Delay from arrival until the boarding phase begins.
    pub fn boarding_display_delay(&self) -> Duration {
        clamped_delay(self.boarding_display_delay_ms)
    }

    /// Delay from arrival until the ride starts automatically.
    pub fn boarding_total_delay(&self) -> Duration {
        clamped_delay(
            self.boarding_display_delay_ms
                .saturating_add(self.boarding_grace_delay_ms),
        )
    }

    /// Maximum age of a fresh position sample.
    pub fn fresh_position_max_age(&self) -> Duration {
        clamped_delay(self.fresh_position_max_age_ms)
    }

    /// Number of reveal frames for the configured duration and tick.
    pub fn reveal_frames(&self) -> usize {
        let tick = self.reveal_tick_ms.max(1);
        (self.reveal_duration_ms.div_ceil(tick)).max(1) as usize
    }
}

// Fields are public, so unvalidated values still map into range
fn clamped_delay(ms: i64) -> Duration {
    Duration::milliseconds(ms.clamp(0, 2 * MAX_DELAY_MS))
}
