//! Relative duration parsing
//!
//! Durations are written as one or more `<integer><unit>` terms, for example
//! `5m`, `1h30m` or `2w`.
//!
//! | unit | meaning     |
//! |------|-------------|
//! | ms   | millisecond |
//! | s    | second      |
//! | m    | minute      |
//! | h    | hour        |
//! | d    | day         |
//! | w    | week        |
//! | n    | 30 days     |
//! | y    | 365 days    |

use crate::error::{Error, Result};
use chrono::Duration;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, map_res},
    multi::many1,
    IResult, Parser,
};

fn unit_millis(unit: &str) -> i64 {
    match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 7 * 86_400_000,
        "n" => 30 * 86_400_000,
        _ => 365 * 86_400_000,
    }
}

/// One `<integer><unit>` term, in milliseconds
fn parse_term(input: &str) -> IResult<&str, i64> {
    let (input, num) = map_res(digit1, str::parse::<i64>).parse(input)?;
    // "ms" before "m"
    let (input, unit) = alt((
        tag("ms"),
        tag("s"),
        tag("m"),
        tag("h"),
        tag("d"),
        tag("w"),
        tag("n"),
        tag("y"),
    ))
    .parse(input)?;
    Ok((input, num.saturating_mul(unit_millis(unit))))
}

/// Parse a duration such as `1h` or `1d12h`
pub fn parse_duration(s: &str) -> Result<Duration> {
    let trimmed = s.trim();
    let (_, terms) = all_consuming(many1(parse_term))
        .parse(trimmed)
        .map_err(|_| Error::InvalidDuration(s.to_string()))?;
    let millis = terms
        .into_iter()
        .try_fold(0i64, i64::checked_add)
        .ok_or_else(|| Error::InvalidDuration(format!("{} overflows", s)))?;
    Duration::try_milliseconds(millis)
        .ok_or_else(|| Error::InvalidDuration(format!("{} overflows", s)))
}

/// Format a duration with the largest whole units first, `0s` when zero
///
/// Sub-second remainders are written in `ms`. The output parses back with
/// [`parse_duration`].
pub fn format_duration(d: Duration) -> String {
    let mut millis = d.num_milliseconds();
    if millis == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    if millis < 0 {
        out.push('-');
        millis = -millis;
    }
    for (unit, size) in [
        ("d", 86_400_000),
        ("h", 3_600_000),
        ("m", 60_000),
        ("s", 1_000),
        ("ms", 1),
    ] {
        if millis >= size {
            out.push_str(&format!("{}{}", millis / size, unit));
            millis %= size;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_parsing() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::minutes(5));
        assert_eq!(parse_duration("1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_duration("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_duration("1w").unwrap(), Duration::weeks(1));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::milliseconds(250));
        assert_eq!(parse_duration("1n").unwrap(), Duration::days(30));
        assert_eq!(parse_duration("1y").unwrap(), Duration::days(365));
    }

    #[test]
    fn test_compound_duration() {
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::minutes(90)
        );
        assert_eq!(parse_duration(" 2d ").unwrap(), Duration::days(2));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::zero()), "0s");
        assert_eq!(format_duration(Duration::days(7)), "7d");
        assert_eq!(format_duration(Duration::minutes(90)), "1h30m");
        assert_eq!(format_duration(Duration::milliseconds(1500)), "1s500ms");
        let d = Duration::hours(26) + Duration::seconds(5);
        assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
    }

    #[test]
    fn test_invalid_duration() {
        for bad in ["", "h", "5", "5x", "-5m", "1.5h", "5m extra"] {
            assert!(
                matches!(parse_duration(bad), Err(Error::InvalidDuration(_))),
                "{} should fail",
                bad
            );
        }
    }
}
