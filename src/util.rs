use chrono::{DateTime, NaiveDate};

/// Truncate a string to `max` characters, appending "…" if truncated.
/// Handles multi-byte text correctly via char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}…")
    }
}

/// Format a unix-ms timestamp as `YYYY-MM-DD` (UTC).
pub fn format_date(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Parse a date argument into unix ms. Accepts RFC 3339 or a bare
/// `YYYY-MM-DD`; bare dates resolve to the start of the day, or the end of
/// the day when `end_of_day` is set (so a `date_end` of "2026-08-07" includes
/// records from that whole day).
pub fn parse_date(s: &str, end_of_day: bool) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let start = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();
    if end_of_day {
        Some(start + 86_400_000 - 1)
    } else {
        Some(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_no_truncate() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn ascii_truncate() {
        assert_eq!(truncate_chars("hello world", 5), "hello…");
    }

    #[test]
    fn empty_string() {
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn date_roundtrip() {
        let ms = parse_date("2026-08-07", false).unwrap();
        assert_eq!(format_date(ms), "2026-08-07");
    }

    #[test]
    fn end_of_day_covers_whole_day() {
        let start = parse_date("2026-08-07", false).unwrap();
        let end = parse_date("2026-08-07", true).unwrap();
        assert_eq!(end - start, 86_400_000 - 1);
    }

    #[test]
    fn rfc3339_accepted() {
        assert!(parse_date("2026-08-07T12:30:00Z", false).is_some());
    }

    #[test]
    fn garbage_rejected() {
        assert!(parse_date("next tuesday", false).is_none());
    }
}
