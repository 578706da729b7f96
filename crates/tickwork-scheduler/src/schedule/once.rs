use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use super::Schedule;
use crate::clock::Clock;

/// Fires once at a fixed instant.
///
/// The first evaluation always yields the instant, even one in the past, so a
/// job loaded late still runs once. After that it never fires again unless
/// the job is reloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnceAtSchedule {
    at: DateTime<Utc>,
}

impl OnceAtSchedule {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }
}

impl Schedule for OnceAtSchedule {
    fn next(&self, _clock: &dyn Clock, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match after {
            None => Some(self.at),
            Some(after) if self.at > after => Some(self.at),
            Some(_) => None,
        }
    }
}

impl fmt::Display for OnceAtSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "once at {}", self.at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}
