//! Duration parsing from strings
//!
//! Human-readable durations used in configuration files: `"500ms"`, `"10s"`,
//! `"1m 30s"`, `"2h"`. Units may be combined and are summed.

use std::time::Duration;

use thiserror::Error;

/// Error type for duration parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("Invalid duration format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Empty duration string")]
    EmptyString,
}

/// Parse a duration string with millisecond precision
///
/// Supported units: `us`, `ms`, `s`, `m`, `h`, `d`, `w`. Fractions are
/// accepted for `s` and larger units (`"1.5s"`).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use porter_common::time::duration::parse_duration_ms;
///
/// assert_eq!(parse_duration_ms("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration_ms("1s 500ms").unwrap(), Duration::from_millis(1500));
/// assert_eq!(parse_duration_ms("2h").unwrap(), Duration::from_secs(7200));
/// ```
pub fn parse_duration_ms(s: &str) -> Result<Duration, DurationParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DurationParseError::EmptyString);
    }

    let mut total = Duration::ZERO;
    let mut current_number = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() || ch == '.' {
            current_number.push(ch);
            continue;
        }
        if ch.is_whitespace() {
            continue;
        }

        let unit = match (ch, chars.peek()) {
            ('m', Some('s')) => {
                chars.next();
                "ms".to_string()
            }
            ('u', Some('s')) => {
                chars.next();
                "us".to_string()
            }
            _ => ch.to_string(),
        };

        if current_number.is_empty() {
            return Err(DurationParseError::InvalidFormat(format!(
                "expected number before unit in '{s}'"
            )));
        }

        let value: f64 = current_number
            .parse()
            .map_err(|_| DurationParseError::InvalidNumber(current_number.clone()))?;
        if !value.is_finite() || value < 0.0 {
            return Err(DurationParseError::InvalidNumber(current_number.clone()));
        }

        let seconds = match unit.as_str() {
            "us" => value / 1_000_000.0,
            "ms" => value / 1_000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3_600.0,
            "d" => value * 86_400.0,
            "w" => value * 604_800.0,
            _ => return Err(DurationParseError::UnknownUnit(unit)),
        };

        total += Duration::try_from_secs_f64(seconds)
            .map_err(|_| DurationParseError::InvalidNumber(current_number.clone()))?;
        current_number.clear();
    }

    if !current_number.is_empty() {
        return Err(DurationParseError::InvalidFormat(format!("missing unit after number in '{s}'")));
    }

    Ok(total)
}

/// Format a duration in the shortest form [`parse_duration_ms`] accepts.
///
/// Whole hours, minutes and seconds use their unit; anything else falls back
/// to milliseconds.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis % 3_600_000 == 0 {
        format!("{}h", millis / 3_600_000)
    } else if millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{millis}ms")
    }
}
