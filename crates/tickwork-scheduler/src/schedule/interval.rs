use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tickwork_core::duration::format_duration;

use super::{add, Schedule};
use crate::clock::Clock;

/// Fires every `interval`. The first fire is `interval` after load, pushed
/// back further by the optional start delay.
///
/// A zero interval never fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalSchedule {
    interval: Duration,
    start_delay: Option<Duration>,
}

impl IntervalSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            start_delay: None,
        }
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start_delay(&self) -> Option<Duration> {
        self.start_delay
    }
}

impl Schedule for IntervalSchedule {
    fn next(&self, clock: &dyn Clock, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if self.interval.is_zero() {
            return None;
        }
        match after {
            Some(after) => add(after, self.interval),
            None => {
                let first = self.start_delay.unwrap_or_default() + self.interval;
                add(clock.now(), first)
            }
        }
    }
}

impl fmt::Display for IntervalSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every {}", format_duration(self.interval))?;
        if let Some(delay) = self.start_delay {
            write!(f, " after {}", format_duration(delay))?;
        }
        Ok(())
    }
}
