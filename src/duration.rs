//! ISO-8601 duration parsing for `grantDuration`, plus a handful of
//! legacy non-ISO forms (`30d`, `1h`) that older callers still send.
//!
//! Years are treated as 365×24h and months as 30×24h — a documented
//! approximation (§9 Open Question ii), not strict ISO-8601.

use lazy_static::lazy_static;
use regex::Regex;
use time::Duration;

use crate::error::ConsentError;

const HOUR: i64 = 3600;
const DAY: i64 = 24 * HOUR;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;

lazy_static! {
    static ref ISO_RE: Regex = Regex::new(
        r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$"
    )
    .unwrap();
    static ref LEGACY_RE: Regex = Regex::new(r"^(\d+)\s*([dhms])$").unwrap();
}

/// Default grant duration when none is supplied: `PT1H`.
pub fn default_duration() -> Duration {
    Duration::seconds(HOUR)
}

/// Parse a `grantDuration` string. Empty/missing defaults to 1 hour.
pub fn parse_duration(input: Option<&str>) -> Result<Duration, ConsentError> {
    let input = match input {
        None => return Ok(default_duration()),
        Some(s) if s.trim().is_empty() => return Ok(default_duration()),
        Some(s) => s.trim(),
    };

    if let Some(caps) = ISO_RE.captures(input) {
        // The regex also matches the bare literal "P" (all groups absent);
        // treat that degenerate case as "no duration specified".
        if caps.iter().skip(1).all(|g| g.is_none()) {
            return Ok(default_duration());
        }
        let years: i64 = group_i64(&caps, 1);
        let months: i64 = group_i64(&caps, 2);
        let days: i64 = group_i64(&caps, 3);
        let hours: i64 = group_i64(&caps, 4);
        let minutes: i64 = group_i64(&caps, 5);
        let seconds: f64 = caps
            .get(6)
            .map(|m| m.as_str().parse::<f64>().unwrap_or(0.0))
            .unwrap_or(0.0);

        let total_seconds = years * YEAR
            + months * MONTH
            + days * DAY
            + hours * HOUR
            + minutes * 60
            + seconds as i64;
        return Ok(Duration::seconds(total_seconds));
    }

    if let Some(caps) = LEGACY_RE.captures(input) {
        let n: i64 = caps[1].parse().map_err(|_| {
            ConsentError::validation("grantDuration", "is not a valid duration")
        })?;
        let seconds = match &caps[2] {
            "d" => n * DAY,
            "h" => n * HOUR,
            "m" => n * 60,
            "s" => n,
            _ => unreachable!(),
        };
        return Ok(Duration::seconds(seconds));
    }

    Err(ConsentError::validation(
        "grantDuration",
        "is not a valid ISO-8601 duration",
    ))
}

fn group_i64(caps: &regex::Captures, idx: usize) -> i64 {
    caps.get(idx)
        .map(|m| m.as_str().parse::<i64>().unwrap_or(0))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_one_hour() {
        assert_eq!(parse_duration(None).unwrap(), Duration::seconds(HOUR));
        assert_eq!(parse_duration(Some("")).unwrap(), Duration::seconds(HOUR));
    }

    #[test]
    fn parses_simple_forms() {
        assert_eq!(parse_duration(Some("PT1H")).unwrap(), Duration::seconds(HOUR));
        assert_eq!(parse_duration(Some("P1D")).unwrap(), Duration::seconds(DAY));
        assert_eq!(parse_duration(Some("P30D")).unwrap(), Duration::seconds(30 * DAY));
        assert_eq!(parse_duration(Some("P1Y")).unwrap(), Duration::seconds(YEAR));
    }

    #[test]
    fn parses_compound_form() {
        let d = parse_duration(Some("P1Y2M3DT4H5M6S")).unwrap();
        let expected = YEAR + 2 * MONTH + 3 * DAY + 4 * HOUR + 5 * 60 + 6;
        assert_eq!(d, Duration::seconds(expected));
    }

    #[test]
    fn accepts_legacy_forms() {
        assert_eq!(parse_duration(Some("30d")).unwrap(), Duration::seconds(30 * DAY));
        assert_eq!(parse_duration(Some("1h")).unwrap(), Duration::seconds(HOUR));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration(Some("not-a-duration")).is_err());
    }

    #[test]
    fn bare_p_defaults() {
        assert_eq!(parse_duration(Some("P")).unwrap(), Duration::seconds(HOUR));
    }
}
