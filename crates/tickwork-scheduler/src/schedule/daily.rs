use std::fmt;

use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, TimeZone, Utc, Weekday};

use super::Schedule;
use crate::clock::Clock;

/// Bit set over weekdays; bit `n` is the day `n` days after Sunday.
pub const ALL_DAYS_MASK: u8 = 0b0111_1111;
/// Monday through Friday.
pub const WEEKDAYS_MASK: u8 = 0b0011_1110;
/// Saturday and Sunday.
pub const WEEKEND_DAYS_MASK: u8 = 0b0100_0001;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn bit(day: Weekday) -> u8 {
    1 << day.num_days_from_sunday()
}

/// Build a mask from a list of days. Duplicates are harmless.
pub fn weekday_mask(days: &[Weekday]) -> u8 {
    days.iter().fold(0, |mask, day| mask | bit(*day))
}

pub fn is_weekday(day: Weekday) -> bool {
    WEEKDAYS_MASK & bit(day) != 0
}

pub fn is_weekend_day(day: Weekday) -> bool {
    WEEKEND_DAYS_MASK & bit(day) != 0
}

/// Fires at a fixed UTC time of day on the weekdays in `mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
    mask: u8,
}

impl DailySchedule {
    pub fn new(at: NaiveTime, mask: u8) -> Self {
        Self {
            at,
            mask: mask & ALL_DAYS_MASK,
        }
    }

    pub fn time_of_day(&self) -> NaiveTime {
        self.at
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    pub fn allows(&self, day: Weekday) -> bool {
        self.mask & bit(day) != 0
    }
}

impl Schedule for DailySchedule {
    fn next(&self, clock: &dyn Clock, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let after = after.unwrap_or_else(|| clock.now());
        let today = Utc.from_utc_datetime(&after.date_naive().and_time(self.at));
        // Offset 7 covers a single-day mask whose time already passed today.
        (0..=7)
            .filter_map(|offset| today.checked_add_signed(TimeDelta::days(offset)))
            .find(|candidate| *candidate > after && self.allows(candidate.weekday()))
    }
}

impl fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "daily at {}", self.at.format("%H:%M:%S"))?;
        if self.mask != ALL_DAYS_MASK {
            let days: Vec<String> = WEEK
                .iter()
                .filter(|day| self.allows(**day))
                .map(|day| day.to_string())
                .collect();
            write!(f, " [{}]", days.join(" "))?;
        }
        Ok(())
    }
}
