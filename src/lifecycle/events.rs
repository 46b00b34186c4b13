//! Inbound realtime events and outbound side-effect requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ride::RidePatch;
use crate::PositionSample;

/// Server push carrying a partial ride update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    RideStatusChanged { ride_id: String, patch: RidePatch },
    PriceProposal { ride_id: String, patch: RidePatch },
    DriverFound { ride_id: String, patch: RidePatch },
}

impl RealtimeEvent {
    pub fn ride_id(&self) -> &str {
        match self {
            RealtimeEvent::RideStatusChanged { ride_id, .. }
            | RealtimeEvent::PriceProposal { ride_id, .. }
            | RealtimeEvent::DriverFound { ride_id, .. } => ride_id,
        }
    }

    pub fn patch(&self) -> &RidePatch {
        match self {
            RealtimeEvent::RideStatusChanged { patch, .. }
            | RealtimeEvent::PriceProposal { patch, .. }
            | RealtimeEvent::DriverFound { patch, .. } => patch,
        }
    }

    /// Decode a push payload, e.g.
    /// `{"event":"ride_status_changed","ride_id":"r1","patch":{"status":"ongoing"}}`.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Work the lifecycle machine asks the API/realtime collaborators to do.
///
/// Requests are fire-and-forget from the machine's side; outcomes come back
/// through `DriverMachine::on_side_effect_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum SideEffect {
    StartRide {
        ride_id: String,
    },
    CompleteRide {
        ride_id: String,
    },
    ReportArrival {
        ride_id: String,
        arrived_at: DateTime<Utc>,
    },
    PersistLocation {
        sample: PositionSample,
    },
    BecomeAvailable,
    CancelRide {
        ride_id: String,
    },
    EmergencyCancel {
        ride_id: String,
    },
}

impl SideEffect {
    pub fn name(&self) -> &'static str {
        match self {
            SideEffect::StartRide { .. } => "start_ride",
            SideEffect::CompleteRide { .. } => "complete_ride",
            SideEffect::ReportArrival { .. } => "report_arrival",
            SideEffect::PersistLocation { .. } => "update_location",
            SideEffect::BecomeAvailable => "become_available",
            SideEffect::CancelRide { .. } => "cancel_ride",
            SideEffect::EmergencyCancel { .. } => "emergency_cancel",
        }
    }

    pub fn ride_id(&self) -> Option<&str> {
        match self {
            SideEffect::StartRide { ride_id }
            | SideEffect::CompleteRide { ride_id }
            | SideEffect::ReportArrival { ride_id, .. }
            | SideEffect::CancelRide { ride_id }
            | SideEffect::EmergencyCancel { ride_id } => Some(ride_id),
            SideEffect::PersistLocation { .. } | SideEffect::BecomeAvailable => None,
        }
    }
}
