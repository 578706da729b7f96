//! Human duration strings (`"50ms"`, `"1m30s"`, `"1.5s"`) used by config files,
//! environment overrides and schedule descriptions.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoreError, Result};

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;
/// Fraction digits beyond nanosecond precision are dropped.
const MAX_FRACTION_DIGITS: usize = 18;

/// Parse a duration string made of one or more `<number><unit>` terms.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. Terms may carry a decimal
/// fraction (`"1.5s"`) and can be chained (`"1h30m"`). A bare `"0"` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid(input, "empty string"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(invalid(input, "expected a number"));
        }
        let (number, tail) = rest.split_at(num_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);

        let scale = match unit {
            "ns" => 1,
            "us" | "µs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            "" => return Err(invalid(input, "missing unit")),
            other => return Err(invalid(input, &format!("unknown unit `{other}`"))),
        };

        total = total
            .checked_add(scaled(input, number, scale)?)
            .ok_or_else(|| invalid(input, "overflow"))?;
        rest = next;
    }

    let nanos = u64::try_from(total).map_err(|_| invalid(input, "overflow"))?;
    Ok(Duration::from_nanos(nanos))
}

/// Format a duration so that [`parse_duration`] reads it back unchanged.
///
/// Sub-second values use the largest whole unit (`"250ms"`, `"10us"`); longer
/// values are broken into hours, minutes and (possibly fractional) seconds.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }

    let nanos = d.as_nanos();
    if nanos < NANOS_PER_SEC {
        return if nanos % NANOS_PER_MILLI == 0 {
            format!("{}ms", nanos / NANOS_PER_MILLI)
        } else if nanos % NANOS_PER_MICRO == 0 {
            format!("{}us", nanos / NANOS_PER_MICRO)
        } else {
            format!("{nanos}ns")
        };
    }

    let secs = d.as_secs();
    let (hours, minutes, seconds) = (secs / 3_600, (secs % 3_600) / 60, secs % 60);
    let sub = d.subsec_nanos();

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if sub > 0 {
        let frac = format!("{sub:09}");
        out.push_str(&format!("{seconds}.{}s", frac.trim_end_matches('0')));
    } else if seconds > 0 {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

fn scaled(input: &str, number: &str, scale: u128) -> Result<u128> {
    let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid(input, "expected a number"));
    }
    if frac_part.contains('.') {
        return Err(invalid(input, "malformed number"));
    }

    let whole: u128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| invalid(input, "malformed number"))?
    };
    let mut value = whole
        .checked_mul(scale)
        .ok_or_else(|| invalid(input, "overflow"))?;

    if !frac_part.is_empty() {
        let digits = &frac_part[..frac_part.len().min(MAX_FRACTION_DIGITS)];
        let frac: u128 = digits
            .parse()
            .map_err(|_| invalid(input, "malformed number"))?;
        value = value
            .checked_add(frac * scale / 10u128.pow(digits.len() as u32))
            .ok_or_else(|| invalid(input, "overflow"))?;
    }
    Ok(value)
}

fn invalid(input: &str, reason: &str) -> CoreError {
    CoreError::InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

/// Config values may be written as a duration string or as integer milliseconds.
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Millis(u64),
    Text(String),
}

impl DurationRepr {
    fn into_duration(self) -> Result<Duration> {
        match self {
            DurationRepr::Millis(ms) => Ok(Duration::from_millis(ms)),
            DurationRepr::Text(s) => parse_duration(&s),
        }
    }
}

/// `#[serde(with = "serde_duration")]` for `Duration` fields.
pub mod serde_duration {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{format_duration, DurationRepr};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        DurationRepr::deserialize(d)?
            .into_duration()
            .map_err(de::Error::custom)
    }
}

/// `#[serde(with = "serde_opt_duration")]` for `Option<Duration>` fields.
pub mod serde_opt_duration {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{format_duration, DurationRepr};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<DurationRepr>::deserialize(d)?
            .map(DurationRepr::into_duration)
            .transpose()
            .map_err(de::Error::custom)
    }
}
