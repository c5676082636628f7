//! Timestamp reconciliation for API and local CSV date columns.
//!
//! Accepted shapes, tried in order:
//! - `YYYY-MM-DDTHH:MM:SS[.fff]` and `YYYY-MM-DD HH:MM:SS[.fff]`
//! - `YYYY-MM-DDTHH:MM` and `YYYY-MM-DD HH:MM`
//! - RFC 3339 with an explicit offset (normalized to UTC)
//! - `YYYY-MM-DD` (midnight)
//!
//! Anything else is `None`. Callers treat `None` as absent: reductions skip it
//! and never substitute a sentinel.

use std::fmt;

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime};

const DATE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];
const DATE_FORMAT: &str = "%Y-%m-%d";
const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(NaiveDateTime);

impl Instant {
    pub fn new(value: NaiveDateTime) -> Self {
        Self(value)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.and_time(chrono::NaiveTime::MIN))
    }

    pub fn date(self) -> NaiveDate {
        self.0.date()
    }

    pub fn naive(self) -> NaiveDateTime {
        self.0
    }

    /// Canonical text form, `YYYY-MM-DDTHH:MM:SS` plus fractional seconds
    /// only when non-zero. Re-parses to the same instant.
    pub fn format_canonical(self) -> String {
        self.0.format(CANONICAL_FORMAT).to_string()
    }

    pub fn millis_since(self, earlier: Instant) -> i64 {
        (self.0 - earlier.0).num_milliseconds()
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_canonical())
    }
}

pub fn parse_instant(raw: &str) -> Option<Instant> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for format in DATE_TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Instant(parsed));
        }
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(Instant(parsed.naive_utc()));
    }

    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .ok()
        .map(Instant::from_date)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    parse_instant(raw).map(Instant::date)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn next_day(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(1))
}

/// Maximum over the parseable values; unparseable values are skipped.
pub fn max_instant<'a>(raw_values: impl IntoIterator<Item = &'a str>) -> Option<Instant> {
    raw_values.into_iter().filter_map(parse_instant).max()
}

pub fn min_instant<'a>(raw_values: impl IntoIterator<Item = &'a str>) -> Option<Instant> {
    raw_values.into_iter().filter_map(parse_instant).min()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_time_shape_wins_over_date_only() {
        let parsed = parse_instant("2025-01-05T13:45:10").unwrap();
        assert_eq!(parsed.date(), ymd(2025, 1, 5));
        assert_eq!(parsed.format_canonical(), "2025-01-05T13:45:10");

        let date_only = parse_instant("2025-01-05").unwrap();
        assert_eq!(date_only.format_canonical(), "2025-01-05T00:00:00");
    }

    #[test]
    fn accepts_space_separator_fraction_and_offset() {
        let spaced = parse_instant("2025-03-01 08:00:00").unwrap();
        let with_t = parse_instant("2025-03-01T08:00:00").unwrap();
        assert_eq!(spaced, with_t);

        let fractional = parse_instant("2025-03-01 08:00:00.250").unwrap();
        assert_eq!(fractional.millis_since(spaced), 250);

        let offset = parse_instant("2025-03-01T08:00:00-03:00").unwrap();
        assert_eq!(offset.format_canonical(), "2025-03-01T11:00:00");
    }

    #[test]
    fn garbage_is_invalid_not_an_error() {
        for raw in ["", "   ", "yesterday", "2025-13-01", "01/02/2025", "2025-02-30"] {
            assert_eq!(parse_instant(raw), None, "{raw:?} should be invalid");
        }
    }

    #[test]
    fn canonical_form_round_trips() {
        for raw in [
            "2025-01-01",
            "2025-01-01T23:59:59",
            "2024-02-29 12:00:00",
            "2025-06-30T10:15:30.125",
        ] {
            let first = parse_instant(raw).unwrap();
            let second = parse_instant(&first.format_canonical()).unwrap();
            assert_eq!(first, second, "{raw} should round-trip");
        }
    }

    #[test]
    fn reductions_skip_invalid_values() {
        let values = ["bad", "2025-01-03T00:00:00", "", "2025-01-01", "2025-02-31"];
        assert_eq!(
            max_instant(values).unwrap().format_canonical(),
            "2025-01-03T00:00:00"
        );
        assert_eq!(
            min_instant(values).unwrap().format_canonical(),
            "2025-01-01T00:00:00"
        );
        assert_eq!(max_instant(["nope", ""]), None);
    }

    #[test]
    fn next_day_crosses_month_and_year() {
        assert_eq!(next_day(ymd(2024, 12, 31)), Some(ymd(2025, 1, 1)));
        assert_eq!(next_day(ymd(2024, 2, 28)), Some(ymd(2024, 2, 29)));
    }
}
