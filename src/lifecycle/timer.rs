//! Deadline-based lifecycle timers.
//!
//! A timer is an absolute instant derived from a server timestamp, never a
//! relative countdown. Re-arming after a suspend or reload recomputes the
//! remaining time from the same instant, so two clients scheduling against
//! the same `arrived_at` fire together.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;

/// `at + delay`, saturating at the latest representable instant.
pub(crate) fn offset(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// What happens when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// `arrived_at + display delay`: the arrived phase gives way to boarding
    BoardingBegins,
    /// `arrived_at + display + grace`: the driver starts the ride
    AutoStart,
}

/// A deferred action keyed to an absolute deadline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LifecycleTimer {
    pub kind: TimerKind,
    pub ride_id: String,
    pub deadline: DateTime<Utc>,
}

impl LifecycleTimer {
    /// Boarding phase start for a ride that arrived at `arrived_at`.
    pub fn boarding_begins(
        ride_id: impl Into<String>,
        arrived_at: DateTime<Utc>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            kind: TimerKind::BoardingBegins,
            ride_id: ride_id.into(),
            deadline: offset(arrived_at, config.boarding_display_delay()),
        }
    }

    /// Automatic ride start for a ride that arrived at `arrived_at`.
    pub fn auto_start(
        ride_id: impl Into<String>,
        arrived_at: DateTime<Utc>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            kind: TimerKind::AutoStart,
            ride_id: ride_id.into(),
            deadline: offset(arrived_at, config.boarding_total_delay()),
        }
    }

    /// Time left until the deadline; zero or negative once due.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.deadline - now
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now) <= Duration::zero()
    }

    /// Remaining time as a sleep duration, clamped at zero.
    pub fn sleep_duration(&self, now: DateTime<Utc>) -> std::time::Duration {
        self.remaining(now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_from_arrival() {
        let config = TrackerConfig::default();
        let arrived = Utc::now();

        let start = LifecycleTimer::auto_start("r1", arrived, &config);
        assert_eq!(start.deadline, arrived + Duration::milliseconds(80_000));

        let boarding = LifecycleTimer::boarding_begins("r1", arrived, &config);
        assert_eq!(boarding.deadline, arrived + Duration::milliseconds(60_000));
    }

    #[test]
    fn test_overdue_timer_is_due_immediately() {
        let config = TrackerConfig::default();
        let arrived = Utc::now();
        let timer = LifecycleTimer::auto_start("r1", arrived, &config);

        let now = arrived + Duration::milliseconds(90_000);
        assert!(timer.is_due(now));
        assert_eq!(timer.remaining(now), Duration::milliseconds(-10_000));
        assert_eq!(timer.sleep_duration(now), std::time::Duration::ZERO);
    }

    #[test]
    fn test_remaining_before_deadline() {
        let config = TrackerConfig::default();
        let arrived = Utc::now();
        let timer = LifecycleTimer::auto_start("r1", arrived, &config);

        let now = arrived + Duration::seconds(30);
        assert!(!timer.is_due(now));
        assert_eq!(timer.sleep_duration(now), std::time::Duration::from_secs(50));
        // Exactly at the deadline counts as due
        assert!(timer.is_due(arrived + Duration::seconds(80)));
    }

    #[test]
    fn test_deadline_near_end_of_time_saturates() {
        let config = TrackerConfig::default();
        let arrived = DateTime::<Utc>::MAX_UTC - Duration::seconds(10);
        let timer = LifecycleTimer::auto_start("r1", arrived, &config);
        assert_eq!(timer.deadline, DateTime::<Utc>::MAX_UTC);
        assert!(!timer.is_due(arrived));
    }
}
