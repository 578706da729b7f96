//! Schedules decide when a loaded job fires next.
//!
//! | Constructor                 | Fires                                               |
//! |-----------------------------|-----------------------------------------------------|
//! | [`every`]                   | every fixed interval, optionally after a delay      |
//! | [`on_the_hour`]             | at minute 00 of each hour                           |
//! | [`on_the_quarter_hour`]     | at minutes 00, 15, 30 and 45                        |
//! | [`daily_at`], [`weekly_at`] | at a time of day on selected weekdays               |
//! | [`once_at`]                 | once at an absolute instant                         |
//! | [`immediately`]             | as soon as loaded, then an optional continuation    |
//! | [`times`]                   | the first `n` fires of another schedule             |
//! | [`on_demand`]               | never; only explicit runs                           |

mod daily;
mod hourly;
mod immediate;
mod interval;
mod once;
mod spec;
mod times;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc, Weekday};

use crate::clock::Clock;

pub use daily::{
    is_weekday, is_weekend_day, weekday_mask, DailySchedule, ALL_DAYS_MASK, WEEKDAYS_MASK,
    WEEKEND_DAYS_MASK,
};
pub use hourly::{OnTheHourSchedule, OnTheQuarterHourSchedule};
pub use immediate::ImmediateSchedule;
pub use interval::IntervalSchedule;
pub use once::OnceAtSchedule;
pub use spec::ScheduleSpec;
pub use times::TimesSchedule;

/// Computes the next fire instant of a job.
///
/// `after` is `None` on the first evaluation (at load or enable) and the
/// dispatch time afterwards. A returned instant is always strictly later than
/// `after`; `None` means the job will not fire again on its own.
///
/// The manager evaluates schedules while holding its locks, so implementations
/// must be cheap and either pure or internally synchronized.
pub trait Schedule: fmt::Display + Send + Sync {
    fn next(&self, clock: &dyn Clock, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>>;
}

impl<S: Schedule + ?Sized> Schedule for Arc<S> {
    fn next(&self, clock: &dyn Clock, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        (**self).next(clock, after)
    }
}

impl<S: Schedule + ?Sized> Schedule for Box<S> {
    fn next(&self, clock: &dyn Clock, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        (**self).next(clock, after)
    }
}

/// Never fires on its own. The job only runs through an explicit run request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OnDemandSchedule;

impl Schedule for OnDemandSchedule {
    fn next(&self, _clock: &dyn Clock, _after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        None
    }
}

impl fmt::Display for OnDemandSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("on demand")
    }
}

pub fn every(interval: Duration) -> IntervalSchedule {
    IntervalSchedule::new(interval)
}

pub fn every_second() -> IntervalSchedule {
    every(Duration::from_secs(1))
}

pub fn every_minute() -> IntervalSchedule {
    every(Duration::from_secs(60))
}

pub fn every_hour() -> IntervalSchedule {
    every(Duration::from_secs(3_600))
}

pub fn on_the_hour() -> OnTheHourSchedule {
    OnTheHourSchedule
}

pub fn on_the_quarter_hour() -> OnTheQuarterHourSchedule {
    OnTheQuarterHourSchedule
}

/// Every day at `hour:minute:second` UTC.
///
/// Out-of-range components are clamped to the last valid value.
pub fn daily_at(hour: u32, minute: u32, second: u32) -> DailySchedule {
    DailySchedule::new(time_of_day(hour, minute, second), ALL_DAYS_MASK)
}

/// Monday through Friday at `hour:minute:second` UTC.
pub fn weekdays_at(hour: u32, minute: u32, second: u32) -> DailySchedule {
    DailySchedule::new(time_of_day(hour, minute, second), WEEKDAYS_MASK)
}

/// Saturday and Sunday at `hour:minute:second` UTC.
pub fn weekends_at(hour: u32, minute: u32, second: u32) -> DailySchedule {
    DailySchedule::new(time_of_day(hour, minute, second), WEEKEND_DAYS_MASK)
}

/// The listed weekdays at `hour:minute:second` UTC.
pub fn weekly_at(hour: u32, minute: u32, second: u32, days: &[Weekday]) -> DailySchedule {
    DailySchedule::new(time_of_day(hour, minute, second), weekday_mask(days))
}

pub fn once_at(at: DateTime<Utc>) -> OnceAtSchedule {
    OnceAtSchedule::new(at)
}

pub fn immediately() -> ImmediateSchedule {
    ImmediateSchedule::new()
}

pub fn times(count: usize, inner: impl Schedule + 'static) -> TimesSchedule {
    TimesSchedule::new(count, Arc::new(inner))
}

pub fn on_demand() -> OnDemandSchedule {
    OnDemandSchedule
}

fn time_of_day(hour: u32, minute: u32, second: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour.min(23), minute.min(59), second.min(59)).unwrap_or_default()
}

/// `at + by`, or `None` when the result is not representable.
pub(crate) fn add(at: DateTime<Utc>, by: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn clock() -> FakeClock {
        FakeClock::new("2020-01-01T00:00:00Z".parse().unwrap())
    }

    #[test]
    fn on_demand_never_fires() {
        let c = clock();
        assert_eq!(on_demand().next(&c, None), None);
        assert_eq!(on_demand().next(&c, Some(c.now())), None);
        assert_eq!(on_demand().to_string(), "on demand");
    }

    #[test]
    fn shared_schedules_delegate() {
        let c = clock();
        let shared: Arc<dyn Schedule> = Arc::new(every_second());
        assert_eq!(
            shared.next(&c, None),
            Some("2020-01-01T00:00:01Z".parse().unwrap())
        );
        assert_eq!(shared.to_string(), "every 1s");
    }

    #[test]
    fn time_of_day_clamps_out_of_range_parts() {
        assert_eq!(daily_at(25, 61, 99).to_string(), "daily at 23:59:59");
    }
}
