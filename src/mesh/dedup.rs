//! Time-windowed record of recently seen packet ids

use crate::clock::Clock;
use crate::mesh::types::{PacketId, DEFAULT_DEDUP_WINDOW};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default cap on remembered ids, independent of the time window
pub const DEFAULT_MAX_DEDUP_ENTRIES: usize = 4096;

struct DedupInner {
    /// id -> last time it was recorded
    seen: HashMap<PacketId, u64>,
    /// Recording order; may hold stale pairs for ids recorded again later
    order: VecDeque<(PacketId, u64)>,
}

/// Answers "was this id seen within the last window?"
///
/// All access goes through one mutex so that a check followed by a record
/// (see [`DeduplicationStore::lock`]) is a single atomic step per packet.
pub struct DeduplicationStore {
    window: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    inner: Mutex<DedupInner>,
}

impl DeduplicationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, DEFAULT_DEDUP_WINDOW, DEFAULT_MAX_DEDUP_ENTRIES)
    }

    pub fn with_limits(clock: Arc<dyn Clock>, window: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_entries: max_entries.max(1),
            clock,
            inner: Mutex::new(DedupInner {
                seen: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Has `id` been recorded within the window, as of now?
    pub fn seen(&self, id: &PacketId) -> bool {
        let now = self.clock.now_millis();
        self.lock().seen_at(id, now)
    }

    /// Record a sighting of `id` at `at` (Unix millis)
    pub fn record(&self, id: PacketId, at: u64) {
        self.lock().record(id, at);
    }

    /// Record `id` now unless it is already known; true if it was new
    pub fn check_and_record(&self, id: PacketId) -> bool {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        if guard.seen_at(&id, now) {
            return false;
        }
        guard.record(id, now);
        true
    }

    /// Exclusive access for a multi-step decision
    pub fn lock(&self) -> DedupGuard<'_> {
        DedupGuard {
            inner: self.inner.lock(),
            window_ms: self.window.as_millis() as u64,
            max_entries: self.max_entries,
        }
    }

    /// Reclaim every entry older than the window
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now_millis();
        self.lock().evict_before(now)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

/// Held lock over the store
pub struct DedupGuard<'a> {
    inner: MutexGuard<'a, DedupInner>,
    window_ms: u64,
    max_entries: usize,
}

impl DedupGuard<'_> {
    pub fn seen_at(&self, id: &PacketId, now: u64) -> bool {
        match self.inner.seen.get(id) {
            Some(&at) => now <= at.saturating_add(self.window_ms),
            None => false,
        }
    }

    pub fn record(&mut self, id: PacketId, at: u64) {
        self.evict_before(at);

        self.inner.seen.insert(id, at);
        self.inner.order.push_back((id, at));

        while self.inner.seen.len() > self.max_entries {
            let Some((oldest, stamp)) = self.inner.order.pop_front() else {
                break;
            };
            if self.inner.seen.get(&oldest) == Some(&stamp) {
                self.inner.seen.remove(&oldest);
                debug!("Dedup cache full, forgot packet {}", oldest);
            }
        }
        self.compact();
    }

    /// Drop entries whose window closed before `now`
    fn evict_before(&mut self, now: u64) -> usize {
        let mut evicted = 0;
        while let Some(&(id, stamp)) = self.inner.order.front() {
            if now <= stamp.saturating_add(self.window_ms) {
                break;
            }
            self.inner.order.pop_front();
            if self.inner.seen.get(&id) == Some(&stamp) {
                self.inner.seen.remove(&id);
                evicted += 1;
            }
        }
        self.compact();
        evicted
    }

    /// Keep the order queue from growing past twice the live set when ids
    /// are recorded repeatedly
    fn compact(&mut self) {
        if self.inner.order.len() > self.inner.seen.len() * 2 + 16 {
            let inner = &mut *self.inner;
            let seen = &inner.seen;
            inner
                .order
                .retain(|(id, stamp)| seen.get(id) == Some(stamp));
        }
    }
}
