//! Durable outbound queue
//!
//! Holds every not-yet-delivered entry, hands them out in a fixed
//! priority-then-FIFO order and keeps retry accounting. Entries that run out
//! of attempts, are refused permanently, or are pushed out of a full queue
//! land in a dead-letter table instead of disappearing.

pub mod error;
pub mod queue;
pub mod retry;
pub mod store;
pub mod types;

pub use error::{QueueError, QueueResult};
pub use queue::OutboundQueue;
pub use retry::RetryPolicy;
pub use store::QueueStore;
pub use types::{
    AttemptDisposition, AttemptRecord, DeadLetter, EnqueueReceipt, FailureKind, Priority,
    QueueConfig, QueueEntry, QueuePayload, QueueStats, EVICTED_REASON,
};
