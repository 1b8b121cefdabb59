//! Lease duration parsing and rendering.
//!
//! Durations arrive from humans on the command line and in configuration, so
//! the parser is forgiving about shape: a bare number means hours, compact
//! forms such as `1h30m` combine units, and spelled-out forms such as
//! `30 minutes` are accepted too.

use std::time::Duration;

use thiserror::Error;

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;

/// Errors raised while parsing a lease duration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DurationError {
    /// Raised when the input is blank.
    #[error("duration must not be empty")]
    Empty,
    /// Raised when the input parses to zero.
    #[error("duration must be greater than zero")]
    Zero,
    /// Raised when a numeric component cannot be read.
    #[error("invalid duration value: {0}")]
    InvalidValue(String),
    /// Raised when the input uses an unsupported unit.
    #[error("unknown duration unit: {0}")]
    UnknownUnit(String),
    /// Raised when the input does not match any supported format.
    #[error("invalid duration format: {0}")]
    InvalidFormat(String),
    /// Raised when the duration does not fit in a 64-bit second count.
    #[error("duration is too large: {0}")]
    Overflow(String),
}

/// Parses a lease duration.
///
/// Supported forms, after trimming and lower-casing:
///
/// - a bare integer, interpreted as hours (`"2"`);
/// - compact unit strings built from `d`, `h`, `m` and `s` (`"1h30m"`);
/// - a number followed by a spelled-out unit (`"30 minutes"`, `"1 day"`).
///
/// # Errors
///
/// Returns [`DurationError`] when the input is blank, zero, malformed, uses
/// an unknown unit, or overflows.
pub fn parse_lease_duration(input: &str) -> Result<Duration, DurationError> {
    let text = input.trim().to_ascii_lowercase();
    if text.is_empty() {
        return Err(DurationError::Empty);
    }

    let parsed = if let Ok(hours) = text.parse::<u64>() {
        scale(hours, SECONDS_PER_HOUR, &text)?
    } else if let Some((value, unit)) = split_spelled(&text) {
        parse_spelled(value, unit, &text)?
    } else {
        parse_compact(&text)?
    };

    if parsed.is_zero() {
        return Err(DurationError::Zero);
    }
    Ok(parsed)
}

/// Renders a duration the way operators read lease lengths: `45s`, `12m`,
/// `3h5m`, `2d4h`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < SECONDS_PER_MINUTE {
        return format!("{secs}s");
    }
    if secs < SECONDS_PER_HOUR {
        return format!("{}m", secs.div_euclid(SECONDS_PER_MINUTE));
    }
    if secs < SECONDS_PER_DAY {
        let hours = secs.div_euclid(SECONDS_PER_HOUR);
        let minutes = secs.rem_euclid(SECONDS_PER_HOUR).div_euclid(SECONDS_PER_MINUTE);
        if minutes == 0 {
            return format!("{hours}h");
        }
        return format!("{hours}h{minutes}m");
    }
    let days = secs.div_euclid(SECONDS_PER_DAY);
    let hours = secs.rem_euclid(SECONDS_PER_DAY).div_euclid(SECONDS_PER_HOUR);
    if hours == 0 {
        return format!("{days}d");
    }
    format!("{days}d{hours}h")
}

fn scale(value: u64, unit_secs: u64, text: &str) -> Result<Duration, DurationError> {
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| DurationError::Overflow(text.to_owned()))
}

fn split_spelled(text: &str) -> Option<(&str, &str)> {
    let mut parts = text.split_whitespace();
    let (Some(value), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    Some((value, unit))
}

fn parse_spelled(value: &str, unit: &str, text: &str) -> Result<Duration, DurationError> {
    let amount = value
        .parse::<u64>()
        .map_err(|_| DurationError::InvalidValue(value.to_owned()))?;
    let unit_secs = if unit.starts_with("second") {
        1
    } else if unit.starts_with("minute") {
        SECONDS_PER_MINUTE
    } else if unit.starts_with("hour") {
        SECONDS_PER_HOUR
    } else if unit.starts_with("day") {
        SECONDS_PER_DAY
    } else {
        return Err(DurationError::UnknownUnit(unit.to_owned()));
    };
    scale(amount, unit_secs, text)
}

const fn unit_seconds(unit: char) -> Option<u64> {
    match unit {
        's' => Some(1),
        'm' => Some(SECONDS_PER_MINUTE),
        'h' => Some(SECONDS_PER_HOUR),
        'd' => Some(SECONDS_PER_DAY),
        _ => None,
    }
}

fn parse_compact(text: &str) -> Result<Duration, DurationError> {
    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut saw_component = false;

    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let Some(unit_secs) = unit_seconds(ch) else {
            return Err(DurationError::UnknownUnit(ch.to_string()));
        };
        if digits.is_empty() {
            return Err(DurationError::InvalidFormat(text.to_owned()));
        }
        let value = digits
            .parse::<u64>()
            .map_err(|_| DurationError::InvalidValue(digits.clone()))?;
        total = value
            .checked_mul(unit_secs)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| DurationError::Overflow(text.to_owned()))?;
        digits.clear();
        saw_component = true;
    }

    if !digits.is_empty() || !saw_component {
        return Err(DurationError::InvalidFormat(text.to_owned()));
    }
    Ok(Duration::from_secs(total))
}

/// Serde adapter storing a [`Duration`] as whole seconds.
pub mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialises the duration as an integer number of seconds.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    /// Deserialises an integer number of seconds.
    ///
    /// # Errors
    ///
    /// Propagates deserializer failures.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
