//! HTTP-date parsing and formatting (RFC 9110 §5.6.7).

use chrono::{DateTime, NaiveDateTime, Utc};

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC_850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

/// Parse an HTTP-date into Unix milliseconds.
///
/// Accepts IMF-fixdate and the two obsolete forms. Dates before the epoch
/// are rejected.
pub fn parse_http_date(value: &str) -> Option<u64> {
    let value = value.trim();

    let millis = if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        parsed.timestamp_millis()
    } else if let Ok(parsed) = NaiveDateTime::parse_from_str(value, RFC_850) {
        parsed.and_utc().timestamp_millis()
    } else if let Ok(parsed) = NaiveDateTime::parse_from_str(value, ASCTIME) {
        parsed.and_utc().timestamp_millis()
    } else {
        return None;
    };

    u64::try_from(millis).ok()
}

/// Format Unix milliseconds as an IMF-fixdate.
pub fn format_http_date(millis: u64) -> String {
    let millis = i64::try_from(millis).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .format(IMF_FIXDATE)
        .to_string()
}
