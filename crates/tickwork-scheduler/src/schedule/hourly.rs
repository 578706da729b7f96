use std::fmt;

use chrono::{DateTime, Duration, DurationRound, Utc};

use super::Schedule;
use crate::clock::Clock;

/// Fires at the top of every hour.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OnTheHourSchedule;

/// Fires at minutes 00, 15, 30 and 45 of every hour.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OnTheQuarterHourSchedule;

/// The first multiple of `step` strictly after `from`.
fn next_boundary(from: DateTime<Utc>, step: Duration) -> Option<DateTime<Utc>> {
    from.duration_trunc(step).ok()?.checked_add_signed(step)
}

impl Schedule for OnTheHourSchedule {
    fn next(&self, clock: &dyn Clock, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        next_boundary(after.unwrap_or_else(|| clock.now()), Duration::hours(1))
    }
}

impl Schedule for OnTheQuarterHourSchedule {
    fn next(&self, clock: &dyn Clock, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        next_boundary(after.unwrap_or_else(|| clock.now()), Duration::minutes(15))
    }
}

impl fmt::Display for OnTheHourSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("on the hour")
    }
}

impl fmt::Display for OnTheQuarterHourSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("on the quarter hour")
    }
}
