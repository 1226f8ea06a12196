use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("reset-duration '{0}' is empty")]
    Empty(String),
    #[error("reset-duration '{0}' has no numeric prefix")]
    MissingAmount(String),
    #[error("reset-duration '{0}' has an unrecognised unit '{1}'")]
    UnknownUnit(String, char),
}

/// Parses the reset-duration grammar: an integer followed by a unit from
/// `{s, m, h, d, w, M}`, case-sensitive. `M` means 30 days, a project
/// convention rather than a calendar month.
pub fn parse_reset_duration(token: &str) -> Result<Duration, DurationParseError> {
    if token.is_empty() {
        return Err(DurationParseError::Empty(token.to_string()));
    }

    let unit = token.chars().last().unwrap();
    let amount_str = &token[..token.len() - unit.len_utf8()];
    let amount: i64 = amount_str
        .parse()
        .map_err(|_| DurationParseError::MissingAmount(token.to_string()))?;

    match unit {
        's' => Ok(Duration::seconds(amount)),
        'm' => Ok(Duration::minutes(amount)),
        'h' => Ok(Duration::hours(amount)),
        'd' => Ok(Duration::days(amount)),
        'w' => Ok(Duration::weeks(amount)),
        'M' => Ok(Duration::days(amount * 30)),
        other => Err(DurationParseError::UnknownUnit(token.to_string(), other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_reset_duration("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_reset_duration("5m").unwrap(), Duration::minutes(5));
        assert_eq!(parse_reset_duration("1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_reset_duration("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_reset_duration("1w").unwrap(), Duration::weeks(1));
        assert_eq!(parse_reset_duration("1M").unwrap(), Duration::days(30));
    }

    #[test]
    fn month_is_thirty_days_not_calendar() {
        let d = parse_reset_duration("2M").unwrap();
        assert_eq!(d, Duration::days(60));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_reset_duration("5x").is_err());
    }

    #[test]
    fn rejects_missing_amount() {
        assert!(parse_reset_duration("m").is_err());
    }

    #[test]
    fn case_sensitive_minute_vs_month() {
        assert_ne!(
            parse_reset_duration("1m").unwrap(),
            parse_reset_duration("1M").unwrap()
        );
    }
}
