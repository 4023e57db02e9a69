//! CP56Time2a / CP24Time2a binary time codecs
//!
//! CP56Time2a (7 bytes): ms-of-minute u16 LE, minute (+IV), hour (+SU),
//! day-of-month + day-of-week, month, two-digit year. CP24Time2a is the
//! 3-byte prefix; the date part is taken from the receiver clock on decode.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{CollSrvError, Result};

pub const CP56_LEN: usize = 7;
pub const CP24_LEN: usize = 3;

/// Encode a CP56Time2a timestamp (IV and SU always clear)
pub fn encode_cp56(ts: NaiveDateTime, out: &mut Vec<u8>) {
    let millis = (ts.second() * 1000 + ts.and_utc().timestamp_subsec_millis()) as u16;
    out.extend_from_slice(&millis.to_le_bytes());
    out.push((ts.minute() as u8) & 0x3F);
    out.push((ts.hour() as u8) & 0x1F);
    let weekday = ts.weekday().number_from_monday() as u8; // 1..=7
    out.push((weekday << 5) | (ts.day() as u8 & 0x1F));
    out.push(ts.month() as u8 & 0x0F);
    out.push((ts.year() - 2000).clamp(0, 99) as u8 & 0x7F);
}

/// Decode a CP56Time2a timestamp
pub fn decode_cp56(buf: &[u8]) -> Result<NaiveDateTime> {
    if buf.len() < CP56_LEN {
        return Err(CollSrvError::bad_format("truncated CP56Time2a"));
    }
    let millis = u16::from_le_bytes([buf[0], buf[1]]) as u32;
    let minute = (buf[2] & 0x3F) as u32;
    let hour = (buf[3] & 0x1F) as u32;
    let day = (buf[4] & 0x1F) as u32;
    let month = (buf[5] & 0x0F) as u32;
    let year = 2000 + (buf[6] & 0x7F) as i32;

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| CollSrvError::bad_value(format!("CP56Time2a date {year}-{month}-{day}")))?;
    date.and_hms_milli_opt(hour, minute, millis / 1000, millis % 1000)
        .ok_or_else(|| CollSrvError::bad_value(format!("CP56Time2a time {hour}:{minute}")))
}

/// Encode a CP24Time2a timestamp (millisecond + minute only)
pub fn encode_cp24(ts: NaiveDateTime, out: &mut Vec<u8>) {
    let millis = (ts.second() * 1000 + ts.and_utc().timestamp_subsec_millis()) as u16;
    out.extend_from_slice(&millis.to_le_bytes());
    out.push((ts.minute() as u8) & 0x3F);
}

/// Decode a CP24Time2a timestamp; date and hour come from the local clock
pub fn decode_cp24(buf: &[u8]) -> Result<NaiveDateTime> {
    if buf.len() < CP24_LEN {
        return Err(CollSrvError::bad_format("truncated CP24Time2a"));
    }
    let millis = u16::from_le_bytes([buf[0], buf[1]]) as u32;
    let minute = (buf[2] & 0x3F) as u32;
    let now = Local::now().naive_local();
    now.date()
        .and_hms_milli_opt(now.hour(), minute, millis / 1000, millis % 1000)
        .ok_or_else(|| CollSrvError::bad_value(format!("CP24Time2a minute {minute}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2005, 11, 26)
            .unwrap()
            .and_hms_milli_opt(16, 28, 14, 765)
            .unwrap()
    }

    #[test]
    fn cp56_known_vector() {
        // 2005-11-26 (Saturday) 16:28:14.765
        let mut out = Vec::new();
        encode_cp56(sample_time(), &mut out);
        assert_eq!(out, [0xAD, 0x39, 0x1C, 0x10, 0xDA, 0x0B, 0x05]);
    }

    #[test]
    fn cp56_round_trip() {
        let mut out = Vec::new();
        encode_cp56(sample_time(), &mut out);
        assert_eq!(decode_cp56(&out).unwrap(), sample_time());
    }

    #[test]
    fn cp56_rejects_bad_date() {
        // month 0 cannot form a calendar date
        let buf = [0x00, 0x00, 0x00, 0x00, 0x21, 0x00, 0x05];
        assert!(matches!(
            decode_cp56(&buf),
            Err(CollSrvError::BadValue(_))
        ));
    }

    #[test]
    fn cp56_rejects_truncation() {
        assert!(matches!(
            decode_cp56(&[0x00, 0x01, 0x02]),
            Err(CollSrvError::BadFormat(_))
        ));
    }

    #[test]
    fn cp24_keeps_minute_and_millis() {
        let mut out = Vec::new();
        encode_cp24(sample_time(), &mut out);
        assert_eq!(out, [0xAD, 0x39, 0x1C]);
        let decoded = decode_cp24(&out).unwrap();
        assert_eq!(decoded.minute(), 28);
        assert_eq!(decoded.second(), 14);
    }
}
