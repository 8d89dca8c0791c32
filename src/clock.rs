//! Time and identifier sources
//!
//! The relay engine, deduplication store and outbound queue never read the
//! wall clock or global randomness directly; they are handed one of these.

use crate::mesh::PacketId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Millisecond clock (Unix epoch based)
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock backed by chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Source of fresh mesh packet identifiers
pub trait IdSource: Send + Sync {
    fn next_packet_id(&self) -> PacketId;
}

/// Random 8-byte identifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn next_packet_id(&self) -> PacketId {
        PacketId::new(rand::random::<[u8; 8]>())
    }
}

/// Deterministic identifiers counting up from a seed
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn starting_at(seed: u64) -> Self {
        Self {
            next: AtomicU64::new(seed),
        }
    }
}

impl IdSource for SequentialIds {
    fn next_packet_id(&self) -> PacketId {
        PacketId::new(self.next.fetch_add(1, Ordering::SeqCst).to_be_bytes())
    }
}
