//! # Time Representation & Suffix Parser
//!
//! Every time value in the engine is a non-negative 64-bit integer count of
//! **nanoseconds**. Configuration documents may spell times as bare numbers,
//! suffixed strings (`"1ms"`, `"2,5 s"`) or two-element intervals
//! `[lo, hi]`; intervals are sampled uniformly at the moment of consumption.

use serde::Deserialize;
use thiserror::Error;

use crate::rng::SimRng;

/// Simulated time in integer nanoseconds.
pub type SimTime = u64;

/// One millisecond in nanoseconds.
pub const MILLIS: SimTime = 1_000_000;
/// One second in nanoseconds.
pub const SECS: SimTime = 1_000_000_000;

/// Time-parse failures. All are fatal for the whole configuration load.
#[derive(Debug, Error, PartialEq)]
pub enum TimeError {
    /// The numeric part did not parse or was not finite.
    #[error("bad numeric value `{0}`")]
    BadNumber(String),

    /// The suffix was not a recognised unit.
    #[error("unknown time unit `{0}`")]
    UnknownUnit(String),

    /// Negative times have no meaning here.
    #[error("negative time `{0}`")]
    Negative(String),

    /// An interval was not a two-element `[lo, hi]` with `lo <= hi`.
    #[error("bad interval: {0}")]
    BadInterval(String),
}

/// A time value exactly as it appears in a configuration document,
/// before unit resolution.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTime {
    /// Bare integer, scaled by the caller's default unit.
    Int(u64),
    /// Bare float, scaled by the caller's default unit.
    Float(f64),
    /// Suffixed string, e.g. `"1ms"` or `"2,5 s"`.
    Text(String),
    /// Two-element `[lo, hi]` interval.
    Interval(Vec<RawTime>),
}

impl RawTime {
    /// Resolve into nanoseconds. `default_scale` applies to unit-less
    /// numbers (callers pass 1 for plain-nanosecond fields).
    pub fn resolve(&self, default_scale: SimTime) -> Result<TimeSpec, TimeError> {
        match self {
            RawTime::Int(v) => Ok(TimeSpec::Fixed(scale_int(*v, default_scale)?)),
            RawTime::Float(v) => Ok(TimeSpec::Fixed(scale_float(*v, default_scale)?)),
            RawTime::Text(s) => Ok(TimeSpec::Fixed(parse_text(s, default_scale)?)),
            RawTime::Interval(pair) => {
                if pair.len() != 2 {
                    return Err(TimeError::BadInterval(format!(
                        "expected 2 elements, got {}",
                        pair.len()
                    )));
                }
                let lo = pair[0].resolve_scalar(default_scale)?;
                let hi = pair[1].resolve_scalar(default_scale)?;
                if lo > hi {
                    return Err(TimeError::BadInterval(format!("lo {lo} > hi {hi}")));
                }
                Ok(TimeSpec::Between(lo, hi))
            }
        }
    }

    fn resolve_scalar(&self, default_scale: SimTime) -> Result<SimTime, TimeError> {
        match self.resolve(default_scale)? {
            TimeSpec::Fixed(t) => Ok(t),
            TimeSpec::Between(..) => {
                Err(TimeError::BadInterval("intervals do not nest".into()))
            }
        }
    }
}

/// A resolved time specification: either a fixed instant/duration or a
/// uniform interval sampled on every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    /// A single value.
    Fixed(SimTime),
    /// `[lo, hi]`, both inclusive.
    Between(SimTime, SimTime),
}

impl TimeSpec {
    /// Draw a concrete value. Fixed specs ignore the RNG.
    pub fn sample(&self, rng: &mut SimRng) -> SimTime {
        match *self {
            TimeSpec::Fixed(t) => t,
            TimeSpec::Between(lo, hi) => rng.uniform(lo, hi),
        }
    }

    /// Smallest value this spec can yield.
    pub fn lower_bound(&self) -> SimTime {
        match *self {
            TimeSpec::Fixed(t) => t,
            TimeSpec::Between(lo, _) => lo,
        }
    }
}

fn scale_int(value: u64, scale: SimTime) -> Result<SimTime, TimeError> {
    value
        .checked_mul(scale)
        .ok_or_else(|| TimeError::BadNumber(format!("{value} overflows at scale {scale}")))
}

fn scale_float(value: f64, scale: SimTime) -> Result<SimTime, TimeError> {
    if !value.is_finite() {
        return Err(TimeError::BadNumber(value.to_string()));
    }
    if value < 0.0 {
        return Err(TimeError::Negative(value.to_string()));
    }
    let scaled = value * scale as f64;
    if scaled > u64::MAX as f64 {
        return Err(TimeError::BadNumber(format!("{value} overflows at scale {scale}")));
    }
    Ok(scaled.round() as SimTime)
}

/// Parse a suffixed time string. The decimal separator is `.` or `,`;
/// a missing unit falls back to `default_scale`.
pub fn parse_text(input: &str, default_scale: SimTime) -> Result<SimTime, TimeError> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != ',')
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let num = num.replace(',', ".");
    if num.is_empty() {
        return Err(TimeError::BadNumber(input.to_string()));
    }
    let value: f64 = num
        .parse()
        .map_err(|_| TimeError::BadNumber(input.to_string()))?;

    let unit = unit.trim();
    let scale = if unit.is_empty() {
        default_scale
    } else {
        unit_scale(unit).ok_or_else(|| TimeError::UnknownUnit(unit.to_string()))?
    };
    scale_float(value, scale)
}

/// Nanosecond multiplier for a unit suffix.
fn unit_scale(unit: &str) -> Option<SimTime> {
    let scale = match unit {
        "ns" => 1,
        "us" | "µs" | "μs" | "microsecond" | "microseconds" => 1_000,
        "ms" | "millisecond" | "milliseconds" => MILLIS,
        "s" | "sec" | "secs" | "second" | "seconds" => SECS,
        "m" | "min" | "mins" | "minute" | "minutes" => 60 * SECS,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600 * SECS,
        _ => return None,
    };
    Some(scale)
}

/// Render nanoseconds with the largest unit that divides cleanly.
/// Used by the text report; never round-trips through the parser.
pub fn display(t: SimTime) -> String {
    for (scale, suffix) in [(3_600 * SECS, "h"), (60 * SECS, "m"), (SECS, "s"), (MILLIS, "ms"), (1_000, "us")] {
        if t >= scale && t % scale == 0 {
            return format!("{}{}", t / scale, suffix);
        }
    }
    format!("{t}ns")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixes() {
        assert_eq!(parse_text("1ms", 1), Ok(1_000_000));
        assert_eq!(parse_text("2 s", 1), Ok(2_000_000_000));
        assert_eq!(parse_text("3min", 1), Ok(180 * SECS));
        assert_eq!(parse_text("10us", 1), Ok(10_000));
        assert_eq!(parse_text("7", 1), Ok(7));
    }

    #[test]
    fn test_decimal_comma() {
        assert_eq!(parse_text("1,5ms", 1), Ok(1_500_000));
        assert_eq!(parse_text("0.25s", 1), Ok(250 * MILLIS));
    }

    #[test]
    fn test_default_scale() {
        // A caller-provided scale applies only to unit-less values.
        assert_eq!(parse_text("4", 1_000), Ok(4_000));
        assert_eq!(parse_text("4ns", 1_000), Ok(4));
    }

    #[test]
    fn test_bad_inputs() {
        assert!(matches!(parse_text("", 1), Err(TimeError::BadNumber(_))));
        assert!(matches!(parse_text("1xx", 1), Err(TimeError::UnknownUnit(_))));
        assert!(matches!(parse_text("ms", 1), Err(TimeError::BadNumber(_))));
    }

    #[test]
    fn test_interval_resolution() {
        let raw = RawTime::Interval(vec![RawTime::Int(5), RawTime::Text("1ms".into())]);
        assert_eq!(raw.resolve(1).unwrap(), TimeSpec::Between(5, 1_000_000));

        let bad = RawTime::Interval(vec![RawTime::Int(10), RawTime::Int(5)]);
        assert!(matches!(bad.resolve(1), Err(TimeError::BadInterval(_))));
    }

    #[test]
    fn test_display() {
        assert_eq!(display(1_500), "1500ns");
        assert_eq!(display(2_000_000), "2ms");
        assert_eq!(display(SECS), "1s");
    }

    #[quickcheck_macros::quickcheck]
    fn prop_bare_integers_parse_as_nanoseconds(value: u32) -> bool {
        parse_text(&value.to_string(), 1) == Ok(SimTime::from(value))
    }
}
