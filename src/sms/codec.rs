//! Compact single-segment status format
//!
//! ```text
//! BCN|<id8>|<lat>,<lon>|<status>|<ts36>
//! ```
//!
//! Encoding is lossy: the student id is cut to eight characters and
//! coordinates are rounded to four decimals. Re-encoding a decoded message
//! reproduces it exactly.

use crate::sms::error::{SmsError, SmsResult};
use crate::sms::types::{SmsPayload, StatusCode, MAX_SMS_LEN, SMS_PREFIX, STUDENT_ID_LEN};
use chrono::{DateTime, Utc};

const FIELD_COUNT: usize = 5;
const FIELD_SEPARATOR: char = '|';
const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Render `payload` as an SMS body.
///
/// The truncated student id may not contain the `|` field separator.
pub fn encode(payload: &SmsPayload) -> SmsResult<String> {
    let id: String = payload.student_id.chars().take(STUDENT_ID_LEN).collect();
    if id.contains(FIELD_SEPARATOR) {
        return Err(SmsError::InvalidStudentId(id));
    }
    let text = format!(
        "BCN|{}|{:.4},{:.4}|{}|{}",
        id,
        payload.latitude,
        payload.longitude,
        payload.status.as_code(),
        to_base36(payload.timestamp.timestamp())
    );

    let len = text.chars().count();
    if len > MAX_SMS_LEN {
        return Err(SmsError::PayloadTooLarge {
            len,
            max: MAX_SMS_LEN,
        });
    }
    Ok(text)
}

/// Parse an SMS body. Fields are checked left to right.
pub fn decode(text: &str) -> SmsResult<SmsPayload> {
    let fields: Vec<&str> = text.trim().split(FIELD_SEPARATOR).collect();
    if fields.len() != FIELD_COUNT || fields[0] != "BCN" {
        return Err(SmsError::InvalidFormat(format!(
            "expected {} '|'-separated fields starting with BCN",
            FIELD_COUNT
        )));
    }

    let student_id = fields[1];
    if student_id.chars().count() > STUDENT_ID_LEN {
        return Err(SmsError::InvalidFormat(format!(
            "student id must be at most {} characters",
            STUDENT_ID_LEN
        )));
    }

    let (latitude, longitude) = parse_coordinates(fields[2])?;
    let status: StatusCode = fields[3].parse()?;
    let timestamp = parse_timestamp(fields[4])?;

    Ok(SmsPayload {
        student_id: student_id.to_string(),
        latitude,
        longitude,
        status,
        timestamp,
    })
}

/// Cheap check for whether an inbound SMS belongs to this codec
pub fn is_recognized(text: &str) -> bool {
    text.trim_start().starts_with(SMS_PREFIX)
}

fn parse_coordinates(field: &str) -> SmsResult<(f64, f64)> {
    let invalid = || SmsError::InvalidCoordinates(field.to_string());

    let (lat, lon) = field.split_once(',').ok_or_else(invalid)?;
    let latitude: f64 = lat.trim().parse().map_err(|_| invalid())?;
    let longitude: f64 = lon.trim().parse().map_err(|_| invalid())?;

    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(invalid());
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(invalid());
    }
    Ok((latitude, longitude))
}

fn parse_timestamp(field: &str) -> SmsResult<DateTime<Utc>> {
    let secs = from_base36(field)?;
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| SmsError::InvalidTimestamp(field.to_string()))
}

/// Lowercase base-36 rendering of a signed integer
pub fn to_base36(value: i64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut n = value.unsigned_abs();
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36_DIGITS[(n % 36) as usize] as char);
        n /= 36;
    }
    if value < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

pub fn from_base36(text: &str) -> SmsResult<i64> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('+') {
        return Err(SmsError::InvalidTimestamp(text.to_string()));
    }
    i64::from_str_radix(text, 36).map_err(|_| SmsError::InvalidTimestamp(text.to_string()))
}
