use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Entry not found: {0}")]
    NotFound(Uuid),

    #[error("Queue is full (capacity: {0}) and every entry is in flight")]
    QueueFull(usize),

    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    #[error("Corrupt stored entry: {0}")]
    CorruptEntry(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationError(err.to_string())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
