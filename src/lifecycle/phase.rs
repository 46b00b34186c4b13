//! Presentation sub-state derived from a ride's status and arrival stamp.
//!
//! The rider never runs proximity checks. Both roles derive the phase from
//! the same `status`/`arrived_at` fields and the same delay constants, so
//! their screens switch to "boarding" at the same wall-clock instant without
//! exchanging extra messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ride::{Ride, RideStatus};
use super::timer::{offset, LifecycleTimer};
use crate::config::TrackerConfig;

/// What the pickup/trip screen shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum PresentationPhase {
    /// Driver heading to the pickup
    Approaching,
    /// Driver at the pickup, within the display delay
    Arrived,
    /// Display delay elapsed, waiting for the ride to start
    Boarding,
    Ongoing,
}

/// Derive the phase. `None` outside the accepted/ongoing statuses.
pub fn presentation_phase(
    status: RideStatus,
    arrived_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &TrackerConfig,
) -> Option<PresentationPhase> {
    match status {
        RideStatus::Ongoing => Some(PresentationPhase::Ongoing),
        RideStatus::Accepted => Some(match arrived_at {
            None => PresentationPhase::Approaching,
            Some(at) if now < offset(at, config.boarding_display_delay()) => PresentationPhase::Arrived,
            Some(_) => PresentationPhase::Boarding,
        }),
        _ => None,
    }
}

/// Phase of a ride at `now`.
pub fn ride_phase(
    ride: &Ride,
    now: DateTime<Utc>,
    config: &TrackerConfig,
) -> Option<PresentationPhase> {
    presentation_phase(ride.status, ride.arrived_at, now, config)
}

/// Timer that flips the phase from arrived to boarding, if still pending.
pub fn boarding_timer(
    ride: &Ride,
    now: DateTime<Utc>,
    config: &TrackerConfig,
) -> Option<LifecycleTimer> {
    if ride.status != RideStatus::Accepted {
        return None;
    }
    let timer = LifecycleTimer::boarding_begins(ride.id.clone(), ride.arrived_at?, config);
    (!timer.is_due(now)).then_some(timer)
}
