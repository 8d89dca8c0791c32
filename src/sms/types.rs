use crate::sms::error::SmsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Leading marker of every Beacon SMS body
pub const SMS_PREFIX: &str = "BCN|";

/// Single-segment SMS budget
pub const MAX_SMS_LEN: usize = 160;

/// Characters of the student id kept on the wire
pub const STUDENT_ID_LEN: usize = 8;

/// The fixed status code set carried by the SMS format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Moving,
    NeedsAssistance,
    Urgent,
    Detained,
    Medical,
}

impl StatusCode {
    pub const ALL: [StatusCode; 6] = [
        StatusCode::Ok,
        StatusCode::Moving,
        StatusCode::NeedsAssistance,
        StatusCode::Urgent,
        StatusCode::Detained,
        StatusCode::Medical,
    ];

    /// Wire symbol
    pub fn as_code(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Moving => "MV",
            StatusCode::NeedsAssistance => "NA",
            StatusCode::Urgent => "UR",
            StatusCode::Detained => "DT",
            StatusCode::Medical => "MED",
        }
    }

    /// Whether the code calls for an immediate response
    pub fn is_distress(&self) -> bool {
        matches!(
            self,
            StatusCode::Urgent | StatusCode::Detained | StatusCode::Medical
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for StatusCode {
    type Err = SmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusCode::ALL
            .into_iter()
            .find(|code| code.as_code() == s)
            .ok_or_else(|| SmsError::InvalidStatus(s.to_string()))
    }
}

/// Status update carried over SMS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsPayload {
    pub student_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: StatusCode,
    /// Second precision on the wire
    pub timestamp: DateTime<Utc>,
}

impl SmsPayload {
    pub fn new(
        student_id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        status: StatusCode,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            latitude,
            longitude,
            status,
            timestamp,
        }
    }
}
