use crate::channel::types::ChannelPreference;
use crate::queue::error::QueueError;
use crate::queue::retry::RetryPolicy;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reason recorded for entries pushed out of a full queue
pub const EVICTED_REASON: &str = "evicted";

/// Queue limits and retry behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Live entries held before the last one in draw order is evicted
    pub max_entries: usize,
    /// Dead letters retained (newest kept)
    pub max_dead_letters: usize,
    pub default_max_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_dead_letters: 500,
            default_max_attempts: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn with_max_dead_letters(mut self, max_dead_letters: usize) -> Self {
        self.max_dead_letters = max_dead_letters;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Outbound priority; lower value is drawn first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Panic = 0,
    Status = 1,
    CheckIn = 2,
    Message = 3,
    Telemetry = 4,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Panic,
        Priority::Status,
        Priority::CheckIn,
        Priority::Message,
        Priority::Telemetry,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(rank: u8) -> Option<Priority> {
        Priority::ALL.get(rank as usize).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Panic => "panic",
            Priority::Status => "status",
            Priority::CheckIn => "check-in",
            Priority::Message => "message",
            Priority::Telemetry => "telemetry",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_ascii_lowercase().replace('_', "-");
        let normalized = if normalized == "checkin" {
            "check-in".to_string()
        } else {
            normalized
        };
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| QueueError::InvalidPriority(s.to_string()))
    }
}

/// Opaque bytes or pre-rendered text (SMS bodies)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePayload {
    Bytes(Bytes),
    Text(String),
}

impl QueuePayload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            QueuePayload::Bytes(bytes) => bytes,
            QueuePayload::Text(text) => text.as_bytes(),
        }
    }

    /// Owned bytes; cheap for the `Bytes` variant
    pub fn to_bytes(&self) -> Bytes {
        match self {
            QueuePayload::Bytes(bytes) => bytes.clone(),
            QueuePayload::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            QueuePayload::Text(text) => Some(text),
            QueuePayload::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            QueuePayload::Bytes(_) => "bytes",
            QueuePayload::Text(_) => "text",
        }
    }
}

impl From<String> for QueuePayload {
    fn from(text: String) -> Self {
        QueuePayload::Text(text)
    }
}

impl From<&str> for QueuePayload {
    fn from(text: &str) -> Self {
        QueuePayload::Text(text.to_string())
    }
}

impl From<Bytes> for QueuePayload {
    fn from(bytes: Bytes) -> Self {
        QueuePayload::Bytes(bytes)
    }
}

impl From<Vec<u8>> for QueuePayload {
    fn from(bytes: Vec<u8>) -> Self {
        QueuePayload::Bytes(Bytes::from(bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// One failed send, kept with the entry for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Unix millis
    pub at: u64,
    pub kind: FailureKind,
    pub reason: String,
}

/// One outbound unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: Uuid,
    pub priority: Priority,
    pub channel: ChannelPreference,
    pub payload: QueuePayload,
    /// Unix millis
    pub created_at: u64,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Unix millis
    pub last_attempt_at: Option<u64>,
    pub history: Vec<AttemptRecord>,
    /// Insertion sequence, breaks ties between equal `created_at`
    pub(crate) seq: i64,
}

impl QueueEntry {
    pub fn is_retry_eligible(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Earliest instant (Unix millis) at which another attempt is allowed
    pub fn next_attempt_at(&self, policy: &RetryPolicy) -> u64 {
        match self.last_attempt_at {
            None => self.created_at,
            Some(last) => last.saturating_add(policy.delay_after(self.attempts).as_millis() as u64),
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.history.last().map(|record| record.reason.as_str())
    }

    pub(crate) fn draw_key(&self) -> DrawKey {
        DrawKey {
            priority: self.priority,
            created_at: self.created_at,
            seq: self.seq,
        }
    }
}

/// Total draw order: priority, then creation time, then insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct DrawKey {
    pub priority: Priority,
    pub created_at: u64,
    pub seq: i64,
}

/// An entry that will not be retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub entry: QueueEntry,
    pub reason: String,
    /// Unix millis
    pub dead_at: u64,
}

/// Result of an enqueue
#[derive(Debug, Clone)]
pub struct EnqueueReceipt {
    pub entry: QueueEntry,
    /// Set when the queue was full; may be the new entry itself if it ranks
    /// last in draw order
    pub evicted: Option<DeadLetter>,
}

impl EnqueueReceipt {
    /// Whether the new entry made it into the queue
    pub fn is_queued(&self) -> bool {
        self.evicted
            .as_ref()
            .map_or(true, |dead| dead.entry.id != self.entry.id)
    }
}

/// What `record_attempt` did with the entry
#[derive(Debug, Clone)]
pub enum AttemptDisposition {
    Sent(QueueEntry),
    /// Kept for another try no earlier than `retry_at` (Unix millis)
    Retry { entry: QueueEntry, retry_at: u64 },
    DeadLettered(DeadLetter),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub panic_pending: usize,
    pub status_pending: usize,
    pub check_in_pending: usize,
    pub message_pending: usize,
    pub telemetry_pending: usize,
    pub in_flight: usize,
    pub dead_letters: u64,
    pub total_enqueued: u64,
    pub total_sent: u64,
}

impl QueueStats {
    pub fn total_pending(&self) -> usize {
        self.panic_pending
            + self.status_pending
            + self.check_in_pending
            + self.message_pending
            + self.telemetry_pending
    }

    pub fn pending(&self, priority: Priority) -> usize {
        match priority {
            Priority::Panic => self.panic_pending,
            Priority::Status => self.status_pending,
            Priority::CheckIn => self.check_in_pending,
            Priority::Message => self.message_pending,
            Priority::Telemetry => self.telemetry_pending,
        }
    }

    pub(crate) fn pending_mut(&mut self, priority: Priority) -> &mut usize {
        match priority {
            Priority::Panic => &mut self.panic_pending,
            Priority::Status => &mut self.status_pending,
            Priority::CheckIn => &mut self.check_in_pending,
            Priority::Message => &mut self.message_pending,
            Priority::Telemetry => &mut self.telemetry_pending,
        }
    }
}
