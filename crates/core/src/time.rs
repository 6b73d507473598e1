use std::time::Duration;

use chrono::Utc;

use crate::error::{PathwatchError, Result};

pub const NANOS_PER_MILLI: u64 = 1_000_000;
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Whole seconds of a nanosecond epoch timestamp, rounded down.
pub fn nanos_to_secs(nanos: u64) -> u64 {
    nanos / NANOS_PER_SEC
}

/// Whole milliseconds of a nanosecond epoch timestamp, rounded down.
pub fn nanos_to_millis(nanos: u64) -> u64 {
    nanos / NANOS_PER_MILLI
}

/// Nanosecond span length rounded half-up to whole milliseconds.
pub fn round_nanos_to_millis(nanos: u64) -> u64 {
    nanos.saturating_add(NANOS_PER_MILLI / 2) / NANOS_PER_MILLI
}

/// Caller-reported milliseconds rounded half-up. Negative, NaN and
/// infinite values become 0.
pub fn round_millis(ms: f64) -> u64 {
    if ms.is_finite() && ms > 0.0 {
        (ms + 0.5).floor() as u64
    } else {
        0
    }
}

pub fn now_unix_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| PathwatchError::Parse(format!("invalid duration {input}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_seconds_and_millis() {
        assert_eq!(nanos_to_secs(1_999_999_999), 1);
        assert_eq!(nanos_to_millis(1_999_999), 1);
        assert_eq!(nanos_to_millis(0), 0);
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(round_nanos_to_millis(1_200_000_000), 1200);
        assert_eq!(round_nanos_to_millis(1_499_999), 1);
        assert_eq!(round_nanos_to_millis(1_500_000), 2);
        assert_eq!(round_nanos_to_millis(499_999), 0);
    }

    #[test]
    fn rounds_reported_millis() {
        assert_eq!(round_millis(12.5), 13);
        assert_eq!(round_millis(12.49), 12);
        assert_eq!(round_millis(-3.0), 0);
        assert_eq!(round_millis(f64::NAN), 0);
    }

    #[test]
    fn parses_duration() {
        assert_eq!(parse_duration_str("5m").unwrap(), Duration::from_secs(300));
        assert!(parse_duration_str("nope").is_err());
    }
}
