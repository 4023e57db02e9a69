//! Timestamp formatting helpers
//!
//! Sample timestamps are ISO-8601 local time with millisecond precision;
//! the format doubles as the hash field / list entry in the data series,
//! so it must stay stable.

use chrono::{DateTime, Local, NaiveDateTime};

const ISO_MILLIS: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Format a naive local timestamp as ISO-8601 with millisecond precision
pub fn format_iso_millis(ts: NaiveDateTime) -> String {
    ts.format(ISO_MILLIS).to_string()
}

/// Current local time as ISO-8601 with millisecond precision
pub fn now_iso_millis() -> String {
    format_iso_millis(Local::now().naive_local())
}

/// Parse a timestamp previously produced by [`format_iso_millis`]
pub fn parse_iso_millis(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, ISO_MILLIS).ok()
}

/// Current local time
pub fn now_local() -> NaiveDateTime {
    let now: DateTime<Local> = Local::now();
    now.naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn iso_round_trip() {
        let ts = NaiveDate::from_ymd_opt(2005, 11, 26)
            .unwrap()
            .and_hms_milli_opt(16, 28, 14, 765)
            .unwrap();
        let s = format_iso_millis(ts);
        assert_eq!(s, "2005-11-26T16:28:14.765");
        assert_eq!(parse_iso_millis(&s), Some(ts));
    }
}
