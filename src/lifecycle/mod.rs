//! Ride lifecycle: the ride record, inbound events, outbound side effects,
//! deadline timers and the driver-side state machine.
//!
//! The rider side has no machine of its own. It mirrors server pushes and
//! derives its presentation phase with [`presentation_phase`].

pub mod driver;
pub mod events;
pub mod phase;
pub mod ride;
pub mod timer;

pub use driver::DriverMachine;
pub use events::{RealtimeEvent, SideEffect};
pub use phase::{boarding_timer, presentation_phase, ride_phase, PresentationPhase};
pub use ride::{Confirmation, Ride, RidePatch, RideStatus};
pub use timer::{LifecycleTimer, TimerKind};

use crate::GeoPoint;

/// The point the route should lead to for a ride's current status.
///
/// The pickup while the driver is on the way, the destination once the ride
/// is under way, nothing otherwise.
pub fn active_target(ride: &Ride) -> Option<GeoPoint> {
    match ride.status {
        RideStatus::Accepted => Some(ride.origin),
        RideStatus::Ongoing => Some(ride.destination),
        _ => None,
    }
}
