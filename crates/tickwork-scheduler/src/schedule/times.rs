use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::Schedule;
use crate::clock::Clock;

/// Passes through the first `count` evaluations of an inner schedule, then
/// stops firing.
pub struct TimesSchedule {
    count: usize,
    left: AtomicUsize,
    inner: Arc<dyn Schedule>,
}

impl TimesSchedule {
    pub fn new(count: usize, inner: Arc<dyn Schedule>) -> Self {
        Self {
            count,
            left: AtomicUsize::new(count),
            inner,
        }
    }

    /// Evaluations remaining before the schedule is exhausted.
    pub fn remaining(&self) -> usize {
        self.left.load(Ordering::Acquire)
    }
}

impl Schedule for TimesSchedule {
    fn next(&self, clock: &dyn Clock, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        self.left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .ok()?;
        self.inner.next(clock, after)
    }
}

impl fmt::Display for TimesSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} times {}", self.remaining(), self.count, self.inner)
    }
}

impl fmt::Debug for TimesSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimesSchedule")
            .field("count", &self.count)
            .field("left", &self.remaining())
            .field("inner", &self.inner.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::schedule::{every_second, times};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn stops_after_count() {
        let clock = FakeClock::new(at("2020-01-01T00:00:00Z"));
        let s = times(2, every_second());
        assert_eq!(s.to_string(), "2/2 times every 1s");

        let first = s.next(&clock, None).unwrap();
        let second = s.next(&clock, Some(first)).unwrap();
        assert_eq!(second, at("2020-01-01T00:00:02Z"));
        assert_eq!(s.next(&clock, Some(second)), None);
        assert_eq!(s.remaining(), 0);
        assert_eq!(s.to_string(), "0/2 times every 1s");
    }

    #[test]
    fn zero_times_never_fires() {
        let clock = FakeClock::new(at("2020-01-01T00:00:00Z"));
        let s = times(0, every_second());
        assert_eq!(s.next(&clock, None), None);
        assert_eq!(s.next(&clock, Some(clock.now())), None);
    }
}
