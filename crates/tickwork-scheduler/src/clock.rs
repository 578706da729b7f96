use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Source of "now" for schedules, dispatch and hang detection.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Drive it together with
/// [`JobManager::run_due_jobs`](crate::JobManager::run_due_jobs) and
/// [`JobManager::kill_hanging_jobs`](crate::JobManager::kill_hanging_jobs)
/// to step a manager deterministically.
#[derive(Debug)]
pub struct FakeClock {
    now: RwLock<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Move the clock forward and return the new reading.
    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *now = TimeDelta::from_std(by)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        *now
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_only_moves_when_told() {
        let start: DateTime<Utc> = "2020-01-01T00:00:00Z".parse().unwrap();
        let clock = FakeClock::new(start);
        assert_eq!(clock.now(), start);

        let later = clock.advance(Duration::from_millis(1_500));
        assert_eq!(later, start + TimeDelta::milliseconds(1_500));
        assert_eq!(clock.now(), later);

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn system_clock_is_utc_now() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert!(now >= before);
    }
}
