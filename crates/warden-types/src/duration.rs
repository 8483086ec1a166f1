//! Access duration strings.
//!
//! Durations are written the way operators write them in policy files:
//! `"24h"`, `"30m"`, `"1h30m"`, `"2160h"`. Supported units are seconds,
//! minutes, and hours. An empty string is not a duration; it denotes
//! permanent access and must be handled by the caller before parsing.

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("duration is empty")]
    Empty,
    #[error("invalid duration {0:?}: missing unit")]
    MissingUnit(String),
    #[error("invalid duration {0:?}: unknown unit {1:?}")]
    UnknownUnit(String, String),
    #[error("invalid duration {0:?}: invalid number {1:?}")]
    InvalidNumber(String, String),
}

/// Parse a duration string such as `"24h"` or `"1h30m"`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let mut total = Duration::zero();
    let mut chars = trimmed.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek().copied() {
            if c.is_ascii_digit() {
                number.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if number.is_empty() {
            return Err(DurationParseError::InvalidNumber(
                input.to_string(),
                chars.collect(),
            ));
        }

        let mut unit = String::new();
        while let Some(c) = chars.peek().copied() {
            if c.is_ascii_alphabetic() {
                unit.push(c);
                chars.next();
            } else {
                break;
            }
        }

        let value: i64 = number
            .parse()
            .map_err(|_| DurationParseError::InvalidNumber(input.to_string(), number.clone()))?;

        let part = match unit.as_str() {
            "s" => Duration::seconds(value),
            "m" => Duration::minutes(value),
            "h" => Duration::hours(value),
            "" => return Err(DurationParseError::MissingUnit(input.to_string())),
            other => {
                return Err(DurationParseError::UnknownUnit(
                    input.to_string(),
                    other.to_string(),
                ))
            }
        };
        total += part;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_unit() {
        assert_eq!(parse_duration("24h").unwrap(), Duration::hours(24));
        assert_eq!(parse_duration("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_duration("45s").unwrap(), Duration::seconds(45));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::hours(1) + Duration::minutes(30)
        );
        assert_eq!(
            parse_duration("2160h").unwrap(),
            Duration::hours(2160)
        );
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
        assert_eq!(parse_duration("   "), Err(DurationParseError::Empty));
    }

    #[test]
    fn rejects_missing_unit() {
        assert!(matches!(
            parse_duration("24"),
            Err(DurationParseError::MissingUnit(_))
        ));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(matches!(
            parse_duration("3d"),
            Err(DurationParseError::UnknownUnit(_, _))
        ));
    }

    #[test]
    fn rejects_unit_without_number() {
        assert!(matches!(
            parse_duration("h"),
            Err(DurationParseError::InvalidNumber(_, _))
        ));
    }
}
