//! # Driver Machine
//!
//! Turns the driver's raw position samples into ride-lifecycle transitions:
//!
//! - **Arrival**: within the pickup radius of the origin while `accepted`,
//!   stamp `arrived_at` exactly once per ride.
//! - **Auto start**: at `arrived_at + display + grace`, if still `accepted`,
//!   move to `ongoing` and request "start ride".
//! - **Drop-off**: within the drop-off radius of the destination while
//!   `ongoing`, mark `completed` optimistically and request "complete ride".
//!   A rejected completion re-arms the check for a later sample.
//! - **Auto-connect**: the first fresh sample inside the service area while
//!   offline requests "become available", at most once per machine.
//!
//! Proximity checks run on every sample, so every one-shot transition is
//! guarded by the id of the ride it last fired for.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::events::SideEffect;
use super::ride::{Confirmation, Ride, RideStatus};
use super::timer::{LifecycleTimer, TimerKind};
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::geo_utils::haversine_distance;
use crate::geofence::{installed_service_area, ServiceAreaPolygon};
use crate::PositionSample;

/// Driver-side lifecycle state machine.
#[derive(Debug)]
pub struct DriverMachine {
    config: TrackerConfig,
    service_area: Option<Arc<ServiceAreaPolygon>>,

    available: bool,
    auto_connect_requested: bool,

    // One-shot guards, keyed by ride id
    arrival_stamped_for: Option<String>,
    start_requested_for: Option<String>,
    dropoff_requested_for: Option<String>,
}

impl DriverMachine {
    /// Create a machine. Without an explicit service area the process-wide
    /// installed one is used for auto-connect.
    pub fn new(config: TrackerConfig, service_area: Option<Arc<ServiceAreaPolygon>>) -> Self {
        Self {
            config,
            service_area,
            available: false,
            auto_connect_requested: false,
            arrival_stamped_for: None,
            start_requested_for: None,
            dropoff_requested_for: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Forget per-ride guards, e.g. when the active ride is cleared.
    pub fn reset_ride_guards(&mut self) {
        self.arrival_stamped_for = None;
        self.start_requested_for = None;
        self.dropoff_requested_for = None;
    }

    fn in_service_area(&self, sample: &PositionSample) -> bool {
        match self.service_area.as_deref().or_else(|| installed_service_area()) {
            Some(area) => area.contains(&sample.point),
            None => false,
        }
    }

    fn is_fresh(&self, sample: &PositionSample, now: DateTime<Utc>) -> bool {
        match sample.captured_at {
            Some(at) => now - at <= self.config.fresh_position_max_age(),
            None => true,
        }
    }

    // ========================================================================
    // Position Updates
    // ========================================================================

    /// Evaluate a new position sample of the driver.
    pub fn on_position(
        &mut self,
        ride: Option<&mut Ride>,
        sample: &PositionSample,
        now: DateTime<Utc>,
    ) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        if !sample.point.is_valid() {
            debug!("[DriverMachine] Ignoring malformed position");
            return effects;
        }

        if !self.available
            && !self.auto_connect_requested
            && self.is_fresh(sample, now)
            && self.in_service_area(sample)
        {
            info!("[DriverMachine] Inside service area, requesting availability");
            self.auto_connect_requested = true;
            effects.push(SideEffect::BecomeAvailable);
        }

        let ride_active = ride.as_ref().is_some_and(|r| !r.status.is_terminal());
        if self.available || ride_active {
            effects.push(SideEffect::PersistLocation { sample: *sample });
        }

        if let Some(ride) = ride {
            self.check_arrival(ride, sample, now, &mut effects);
            self.check_dropoff(ride, sample, &mut effects);
        }

        effects
    }

    fn check_arrival(
        &mut self,
        ride: &mut Ride,
        sample: &PositionSample,
        now: DateTime<Utc>,
        effects: &mut Vec<SideEffect>,
    ) {
        if ride.status != RideStatus::Accepted
            || ride.arrived_at.is_some()
            || self.arrival_stamped_for.as_deref() == Some(ride.id.as_str())
        {
            return;
        }

        let distance = haversine_distance(&sample.point, &ride.origin);
        if distance > self.config.pickup_radius_m {
            return;
        }

        info!(
            "[DriverMachine] Arrived at pickup for ride {} ({:.0}m)",
            ride.id, distance
        );
        ride.arrived_at = Some(now);
        self.arrival_stamped_for = Some(ride.id.clone());
        effects.push(SideEffect::ReportArrival {
            ride_id: ride.id.clone(),
            arrived_at: now,
        });
    }

    fn check_dropoff(&mut self, ride: &mut Ride, sample: &PositionSample, effects: &mut Vec<SideEffect>) {
        // A completed ride whose confirmation failed is retried here
        let awaiting_completion = ride.status == RideStatus::Ongoing
            || (ride.status == RideStatus::Completed
                && matches!(ride.confirmation, Confirmation::Failed { .. }));
        if !awaiting_completion || self.dropoff_requested_for.as_deref() == Some(ride.id.as_str()) {
            return;
        }

        let distance = haversine_distance(&sample.point, &ride.destination);
        if distance > self.config.dropoff_radius_m {
            return;
        }

        info!(
            "[DriverMachine] Reached destination for ride {} ({:.0}m), completing",
            ride.id, distance
        );
        self.dropoff_requested_for = Some(ride.id.clone());
        ride.set_optimistic(RideStatus::Completed);
        effects.push(SideEffect::CompleteRide {
            ride_id: ride.id.clone(),
        });
    }

    // ========================================================================
    // Deadlines
    // ========================================================================

    /// The automatic start timer the current ride needs, if any.
    ///
    /// Always derived from the ride's absolute `arrived_at`, so re-arming
    /// after a reload lands on the same instant.
    pub fn auto_start_timer(&self, ride: &Ride) -> Option<LifecycleTimer> {
        if ride.status != RideStatus::Accepted
            || self.start_requested_for.as_deref() == Some(ride.id.as_str())
        {
            return None;
        }
        ride.arrived_at
            .map(|at| LifecycleTimer::auto_start(ride.id.clone(), at, &self.config))
    }

    /// Handle a fired timer. Early or stale timers do nothing.
    pub fn on_deadline(
        &mut self,
        timer: &LifecycleTimer,
        ride: Option<&mut Ride>,
        now: DateTime<Utc>,
    ) -> Vec<SideEffect> {
        if timer.kind != TimerKind::AutoStart {
            return Vec::new();
        }
        let ride = match ride {
            Some(ride) if ride.id == timer.ride_id => ride,
            _ => return Vec::new(),
        };

        // Recompute from the ride itself in case arrived_at moved since arming
        let current = match self.auto_start_timer(ride) {
            Some(current) => current,
            None => return Vec::new(),
        };
        if !current.is_due(now) {
            debug!(
                "[DriverMachine] Auto start for {} not due yet ({}ms left)",
                ride.id,
                current.remaining(now).num_milliseconds()
            );
            return Vec::new();
        }

        info!("[DriverMachine] Boarding grace elapsed, starting ride {}", ride.id);
        self.start_requested_for = Some(ride.id.clone());
        ride.set_optimistic(RideStatus::Ongoing);
        vec![SideEffect::StartRide {
            ride_id: ride.id.clone(),
        }]
    }

    // ========================================================================
    // Side-effect Outcomes
    // ========================================================================

    /// Reconcile the ride with the outcome of a requested side effect.
    pub fn on_side_effect_result(
        &mut self,
        effect: &SideEffect,
        result: &Result<()>,
        ride: Option<&mut Ride>,
    ) {
        let ride = ride.filter(|r| Some(r.id.as_str()) == effect.ride_id());

        match (effect, result) {
            (SideEffect::BecomeAvailable, Ok(())) => {
                info!("[DriverMachine] Driver is available");
                self.available = true;
            }
            (SideEffect::BecomeAvailable, Err(e)) => {
                warn!("[DriverMachine] Auto-connect rejected: {}", e);
            }
            (SideEffect::StartRide { .. }, Ok(())) => {
                if let Some(ride) = ride.filter(|r| r.status == RideStatus::Ongoing) {
                    ride.mark_confirmed();
                }
            }
            (SideEffect::StartRide { ride_id }, Err(e)) => {
                // The optimistic ongoing status is kept
                warn!("[DriverMachine] Start of ride {} rejected: {}", ride_id, e);
                if let Some(ride) = ride {
                    ride.mark_failed(e.to_string());
                }
            }
            (SideEffect::CompleteRide { .. }, Ok(())) => {
                if let Some(ride) = ride.filter(|r| r.status == RideStatus::Completed) {
                    info!("[DriverMachine] Ride {} completed", ride.id);
                    ride.mark_confirmed();
                }
            }
            (SideEffect::CompleteRide { ride_id }, Err(e)) => {
                warn!(
                    "[DriverMachine] Completion of ride {} rejected, will retry: {}",
                    ride_id, e
                );
                if self.dropoff_requested_for.as_deref() == Some(ride_id.as_str()) {
                    self.dropoff_requested_for = None;
                }
                if let Some(ride) = ride {
                    ride.mark_failed(e.to_string());
                }
            }
            (SideEffect::PersistLocation { .. }, Err(e)) => {
                debug!("[DriverMachine] Location update failed: {}", e);
            }
            (effect, Err(e)) => {
                warn!("[DriverMachine] {} failed: {}", effect.name(), e);
            }
            (_, Ok(())) => {}
        }
    }
}
