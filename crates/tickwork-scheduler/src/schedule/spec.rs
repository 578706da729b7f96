use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tickwork_core::duration::{serde_duration, serde_opt_duration};

use super::{
    weekday_mask, DailySchedule, ImmediateSchedule, IntervalSchedule, OnDemandSchedule,
    OnTheHourSchedule, OnTheQuarterHourSchedule, OnceAtSchedule, Schedule, TimesSchedule,
    ALL_DAYS_MASK,
};
use crate::error::{Result, SchedulerError};

/// Serializable description of a schedule, tagged by `kind`.
///
/// ```toml
/// schedule = { kind = "every", interval = "30s" }
/// schedule = { kind = "daily_at", at = "09:30:00", days = ["Mon", "Fri"] }
/// schedule = { kind = "times", count = 3, schedule = { kind = "on_the_hour" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSpec {
    Every {
        #[serde(with = "serde_duration")]
        interval: Duration,
        #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
        start_delay: Option<Duration>,
    },
    OnTheHour,
    OnTheQuarterHour,
    DailyAt {
        at: NaiveTime,
        /// `None` means every day.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        days: Option<Vec<Weekday>>,
    },
    OnceAt {
        at: DateTime<Utc>,
    },
    Immediately {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        then: Option<Box<ScheduleSpec>>,
    },
    Times {
        count: usize,
        schedule: Box<ScheduleSpec>,
    },
    OnDemand,
}

impl ScheduleSpec {
    /// Build the live schedule. Rejects definitions that could never fire
    /// on their own by accident (zero intervals, empty day lists).
    pub fn build(&self) -> Result<Arc<dyn Schedule>> {
        let schedule: Arc<dyn Schedule> = match self {
            ScheduleSpec::Every {
                interval,
                start_delay,
            } => {
                if interval.is_zero() {
                    return Err(SchedulerError::InvalidSchedule(
                        "interval must be greater than zero".to_string(),
                    ));
                }
                let mut every = IntervalSchedule::new(*interval);
                if let Some(delay) = start_delay {
                    every = every.with_start_delay(*delay);
                }
                Arc::new(every)
            }
            ScheduleSpec::OnTheHour => Arc::new(OnTheHourSchedule),
            ScheduleSpec::OnTheQuarterHour => Arc::new(OnTheQuarterHourSchedule),
            ScheduleSpec::DailyAt { at, days } => {
                let mask = match days {
                    None => ALL_DAYS_MASK,
                    Some(days) if days.is_empty() => {
                        return Err(SchedulerError::InvalidSchedule(
                            "daily_at needs at least one day".to_string(),
                        ))
                    }
                    Some(days) => weekday_mask(days),
                };
                Arc::new(DailySchedule::new(*at, mask))
            }
            ScheduleSpec::OnceAt { at } => Arc::new(OnceAtSchedule::new(*at)),
            ScheduleSpec::Immediately { then } => match then {
                Some(then) => Arc::new(ImmediateSchedule::new().then_shared(then.build()?)),
                None => Arc::new(ImmediateSchedule::new()),
            },
            ScheduleSpec::Times { count, schedule } => {
                Arc::new(TimesSchedule::new(*count, schedule.build()?))
            }
            ScheduleSpec::OnDemand => Arc::new(OnDemandSchedule),
        };
        Ok(schedule)
    }
}
