//! Date-like value detection and normalization

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound};

/// Canonical text form of a target date-time. Fractional seconds are kept
/// (`%.f` prints nothing for whole seconds) so watermarks compare exactly.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// The target stores microseconds
const TARGET_SUBSEC_DIGITS: u16 = 6;

/// Sentinel written for missing date-time values
pub const MIN_DATETIME: &str = "1970-01-01 00:00:00";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Parse the common date and date-time patterns.
///
/// Offsets are converted to UTC and dropped.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    // cheap reject before trying every format
    if s.len() < 8 || !s.as_bytes()[0].is_ascii_digit() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Whether a string looks like a date or date-time
pub fn is_datetime(s: &str) -> bool {
    parse_datetime(s).is_some()
}

/// Normalize to `YYYY-MM-DD HH:MM:SS[.ffffff]`, or `None` when unparseable
pub fn normalize_datetime(s: &str) -> Option<String> {
    parse_datetime(s).map(|dt| format_datetime(&dt))
}

/// Format a date-time in the canonical form, truncated to microseconds
pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.trunc_subsecs(TARGET_SUBSEC_DIGITS)
        .format(CANONICAL_FORMAT)
        .to_string()
}

/// The sentinel as a date-time value
pub fn min_datetime() -> NaiveDateTime {
    // NaiveDateTime's default is the Unix epoch
    NaiveDateTime::default()
}
