//! The ride record and its status vocabulary.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::GeoPoint;

/// Ride status shared by rider and driver.
///
/// `searching → negotiating → accepted → ongoing → completed`, with
/// `cancelled` reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum RideStatus {
    Searching,
    Negotiating,
    Accepted,
    Ongoing,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// Position along the forward chain.
    fn rank(self) -> u8 {
        match self {
            RideStatus::Searching => 0,
            RideStatus::Negotiating => 1,
            RideStatus::Accepted => 2,
            RideStatus::Ongoing => 3,
            RideStatus::Completed => 4,
            RideStatus::Cancelled => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Whether moving from `self` to `next` is legal.
    ///
    /// Forward moves along the chain may skip steps (a client can miss
    /// pushes). The only backward move is a failed negotiation returning to
    /// the search. Terminal statuses never change.
    pub fn can_transition_to(self, next: RideStatus) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        match next {
            RideStatus::Cancelled => true,
            RideStatus::Searching => self == RideStatus::Negotiating,
            _ => next.rank() > self.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Searching => "searching",
            RideStatus::Negotiating => "negotiating",
            RideStatus::Accepted => "accepted",
            RideStatus::Ongoing => "ongoing",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }
}

/// Whether the current status has been confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Confirmation {
    Confirmed,
    /// Written locally, side effect requested, no answer yet
    Optimistic,
    /// The side effect behind the local write was rejected
    Failed { reason: String },
}

/// Partial update pushed by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RidePatch {
    pub status: Option<RideStatus>,
    pub counterparty_location: Option<GeoPoint>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub proposed_price: Option<f64>,
}

impl RidePatch {
    pub fn status(status: RideStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// The single active ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: String,
    pub status: RideStatus,
    pub confirmation: Confirmation,
    /// Pickup point
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub counterparty_location: Option<GeoPoint>,
    /// Server-stamped arrival of the driver at the pickup
    pub arrived_at: Option<DateTime<Utc>>,
    pub proposed_price: Option<f64>,
}

impl Ride {
    /// A freshly requested ride, searching for a driver.
    pub fn new(id: impl Into<String>, origin: GeoPoint, destination: GeoPoint) -> Self {
        Self {
            id: id.into(),
            status: RideStatus::Searching,
            confirmation: Confirmation::Confirmed,
            origin,
            destination,
            counterparty_location: None,
            arrived_at: None,
            proposed_price: None,
        }
    }

    pub fn with_status(mut self, status: RideStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_arrived_at(mut self, arrived_at: DateTime<Utc>) -> Self {
        self.arrived_at = Some(arrived_at);
        self
    }

    /// Apply a server patch. Returns whether anything changed.
    ///
    /// A status equal to the current one confirms it. Illegal transitions
    /// are ignored, which also keeps a lagging push from undoing a newer
    /// optimistic write.
    pub fn apply_patch(&mut self, patch: &RidePatch) -> bool {
        let mut changed = false;

        if let Some(status) = patch.status {
            if status == self.status {
                if self.confirmation != Confirmation::Confirmed {
                    self.confirmation = Confirmation::Confirmed;
                    changed = true;
                }
            } else if self.status.can_transition_to(status) {
                self.status = status;
                self.confirmation = Confirmation::Confirmed;
                changed = true;
            } else {
                debug!(
                    "[Ride] Ignoring {} -> {} for ride {}",
                    self.status.as_str(),
                    status.as_str(),
                    self.id
                );
            }
        }

        if patch.arrived_at.is_some() && patch.arrived_at != self.arrived_at {
            self.arrived_at = patch.arrived_at;
            changed = true;
        }
        if patch.counterparty_location.is_some()
            && patch.counterparty_location != self.counterparty_location
        {
            self.counterparty_location = patch.counterparty_location;
            changed = true;
        }
        if patch.proposed_price.is_some() && patch.proposed_price != self.proposed_price {
            self.proposed_price = patch.proposed_price;
            changed = true;
        }

        changed
    }

    /// Write a status locally ahead of server confirmation.
    pub fn set_optimistic(&mut self, status: RideStatus) {
        self.status = status;
        self.confirmation = Confirmation::Optimistic;
    }

    pub fn mark_confirmed(&mut self) {
        self.confirmation = Confirmation::Confirmed;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.confirmation = Confirmation::Failed {
            reason: reason.into(),
        };
    }

    /// Terminal and confirmed: the ride can be dropped.
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal() && self.confirmation == Confirmation::Confirmed
    }
}
