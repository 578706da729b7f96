use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::Schedule;
use crate::clock::Clock;

/// Fires as soon as it is first evaluated, then hands over to an optional
/// continuation.
#[derive(Default)]
pub struct ImmediateSchedule {
    fired: AtomicBool,
    then: Option<Arc<dyn Schedule>>,
}

impl ImmediateSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue with `then` after the immediate fire.
    pub fn then(mut self, then: impl Schedule + 'static) -> Self {
        self.then = Some(Arc::new(then));
        self
    }

    pub(crate) fn then_shared(mut self, then: Arc<dyn Schedule>) -> Self {
        self.then = Some(then);
        self
    }
}

impl Schedule for ImmediateSchedule {
    fn next(&self, clock: &dyn Clock, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if !self.fired.swap(true, Ordering::AcqRel) {
            return Some(clock.now());
        }
        self.then.as_ref().and_then(|then| then.next(clock, after))
    }
}

impl fmt::Display for ImmediateSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.then {
            Some(then) => write!(f, "immediately then {then}"),
            None => f.write_str("immediately"),
        }
    }
}

impl fmt::Debug for ImmediateSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmediateSchedule")
            .field("fired", &self.fired.load(Ordering::Acquire))
            .field("then", &self.then.as_ref().map(|t| t.to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::schedule::every;
    use std::time::Duration;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn fires_now_then_stops() {
        let clock = FakeClock::new(at("2020-01-01T00:00:00Z"));
        let s = ImmediateSchedule::new();
        assert_eq!(s.next(&clock, None), Some(clock.now()));
        assert_eq!(s.next(&clock, Some(clock.now())), None);
    }

    #[test]
    fn hands_over_to_continuation() {
        let clock = FakeClock::new(at("2020-01-01T00:00:00Z"));
        let s = ImmediateSchedule::new().then(every(Duration::from_secs(10)));
        let now = clock.now();
        assert_eq!(s.next(&clock, None), Some(now));
        assert_eq!(s.next(&clock, Some(now)), Some(at("2020-01-01T00:00:10Z")));
        assert_eq!(s.to_string(), "immediately then every 10s");
    }
}
