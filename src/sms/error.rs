use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SmsError {
    #[error("Rendered message is {len} characters (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Student id {0:?} contains the '|' field separator")]
    InvalidStudentId(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid status code: {0}")]
    InvalidStatus(String),

    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

pub type SmsResult<T> = Result<T, SmsError>;
