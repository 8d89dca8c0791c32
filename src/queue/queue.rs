use crate::channel::types::{ChannelPreference, SendOutcome};
use crate::clock::Clock;
use crate::metrics::recorder;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::retry::RetryPolicy;
use crate::queue::store::QueueStore;
use crate::queue::types::{
    AttemptDisposition, AttemptRecord, DeadLetter, DrawKey, EnqueueReceipt, FailureKind,
    Priority, QueueConfig, QueueEntry, QueuePayload, QueueStats, EVICTED_REASON,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct QueueState {
    entries: HashMap<Uuid, QueueEntry>,
    /// Draw-order index
    index: BTreeMap<DrawKey, Uuid>,
    /// Claimed by a flush and not yet reported back
    in_flight: HashSet<Uuid>,
    next_seq: i64,
    dead_letters: u64,
    total_enqueued: u64,
    total_sent: u64,
}

impl QueueState {
    fn insert(&mut self, entry: QueueEntry) {
        self.index.insert(entry.draw_key(), entry.id);
        self.entries.insert(entry.id, entry);
    }

    fn detach(&mut self, id: Uuid) -> Option<QueueEntry> {
        let entry = self.entries.remove(&id)?;
        self.index.remove(&entry.draw_key());
        self.in_flight.remove(&id);
        Some(entry)
    }

    fn ordered(&self) -> impl Iterator<Item = &QueueEntry> {
        self.index.values().filter_map(|id| self.entries.get(id))
    }

    /// Last entry in draw order that no flush is holding
    fn eviction_candidate(&self) -> Option<&QueueEntry> {
        self.index
            .values()
            .rev()
            .filter(|id| !self.in_flight.contains(*id))
            .find_map(|id| self.entries.get(id))
    }

    fn depth(&self, priority: Priority) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.priority == priority)
            .count()
    }
}

/// Durable priority queue of outbound entries.
///
/// Draw order is priority ascending, then `created_at` ascending, then
/// insertion order. Every mutation is persisted before it is applied in
/// memory, and all mutations are serialized through one lock.
pub struct OutboundQueue {
    config: QueueConfig,
    store: QueueStore,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
}

impl OutboundQueue {
    /// Open a queue over `store`, reloading whatever it holds
    pub async fn open(
        store: QueueStore,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> QueueResult<Self> {
        let entries = store.load_entries().await?;
        let mut state = QueueState {
            next_seq: store.max_seq().await? + 1,
            dead_letters: store.count_dead_letters().await?,
            ..Default::default()
        };

        let loaded = entries.len();
        for entry in entries {
            state.insert(entry);
        }
        if loaded > 0 {
            info!("Restored {} queued entries", loaded);
        }

        let queue = Self {
            config,
            store,
            clock,
            state: Mutex::new(state),
        };
        queue.publish_depth(&*queue.state.lock().await);
        Ok(queue)
    }

    /// Queue backed by an in-memory database
    pub async fn in_memory(config: QueueConfig, clock: Arc<dyn Clock>) -> QueueResult<Self> {
        Self::open(QueueStore::new_in_memory().await?, config, clock).await
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// Store a new entry. `max_attempts` falls back to the configured default.
    ///
    /// When the queue is full, whichever entry ranks last in draw order
    /// (possibly the new one) is dead-lettered as "evicted".
    pub async fn enqueue(
        &self,
        priority: Priority,
        payload: impl Into<QueuePayload>,
        channel: ChannelPreference,
        max_attempts: Option<u32>,
    ) -> QueueResult<EnqueueReceipt> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;

        let entry = QueueEntry {
            id: Uuid::new_v4(),
            priority,
            channel,
            payload: payload.into(),
            created_at: now,
            attempts: 0,
            max_attempts: max_attempts
                .unwrap_or(self.config.default_max_attempts)
                .max(1),
            last_attempt_at: None,
            history: Vec::new(),
            seq: state.next_seq,
        };

        // counters move only once the store has accepted the change
        let mut evicted = None;
        if state.entries.len() >= self.config.max_entries {
            let victim = state
                .eviction_candidate()
                .filter(|victim| victim.draw_key() > entry.draw_key())
                .cloned();

            match victim {
                Some(victim) => {
                    let dead = DeadLetter {
                        entry: victim,
                        reason: EVICTED_REASON.to_string(),
                        dead_at: now,
                    };
                    let pruned = self
                        .store
                        .insert_evicting(&entry, &dead, self.config.max_dead_letters)
                        .await?;
                    self.note_buried(&mut state, &dead, pruned);
                    evicted = Some(dead);
                }
                None if state.eviction_candidate().is_some() => {
                    // the newcomer ranks last; it never enters the live table
                    let dead = self
                        .bury(&mut state, entry.clone(), EVICTED_REASON.to_string(), now)
                        .await?;
                    self.note_enqueued(&mut state, priority);
                    return Ok(EnqueueReceipt {
                        entry,
                        evicted: Some(dead),
                    });
                }
                None => return Err(QueueError::QueueFull(self.config.max_entries)),
            }
        } else {
            self.store.insert(&entry).await?;
        }

        state.insert(entry.clone());
        self.note_enqueued(&mut state, priority);

        debug!(
            "Queued {} entry {} for {} ({} bytes)",
            entry.priority,
            entry.id,
            entry.channel,
            entry.payload.len()
        );
        Ok(EnqueueReceipt { entry, evicted })
    }

    /// Every pending entry not currently claimed, in draw order
    pub async fn next_batch(&self) -> Vec<QueueEntry> {
        let state = self.state.lock().await;
        state
            .ordered()
            .filter(|entry| !state.in_flight.contains(&entry.id))
            .cloned()
            .collect()
    }

    /// Claim up to `limit` entries whose retry delay has elapsed.
    ///
    /// Claimed entries are skipped by later claims and by eviction until
    /// [`record_attempt`](Self::record_attempt) or [`release`](Self::release).
    pub async fn claim_due(&self, limit: usize) -> Vec<QueueEntry> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;

        let due: Vec<QueueEntry> = state
            .ordered()
            .filter(|entry| !state.in_flight.contains(&entry.id))
            .filter(|entry| entry.next_attempt_at(&self.config.retry) <= now)
            .take(limit)
            .cloned()
            .collect();

        for entry in &due {
            state.in_flight.insert(entry.id);
        }
        due
    }

    /// Return a claimed entry without counting an attempt
    pub async fn release(&self, id: Uuid) -> bool {
        self.state.lock().await.in_flight.remove(&id)
    }

    /// Apply the result of one send attempt.
    ///
    /// Success removes the entry. A transient failure consumes an attempt and
    /// dead-letters the entry once `max_attempts` is reached; a permanent
    /// failure dead-letters it at once.
    pub async fn record_attempt(
        &self,
        id: Uuid,
        outcome: &SendOutcome,
    ) -> QueueResult<AttemptDisposition> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;

        let mut entry = state
            .entries
            .get(&id)
            .cloned()
            .ok_or(QueueError::NotFound(id))?;

        let (kind, reason) = match outcome {
            SendOutcome::Success => {
                self.store.delete(id).await?;
                state.detach(id);
                state.total_sent += 1;
                self.publish_depth(&state);
                debug!("Entry {} delivered after {} failed attempts", id, entry.attempts);
                return Ok(AttemptDisposition::Sent(entry));
            }
            SendOutcome::TransientFailure(reason) => (FailureKind::Transient, reason),
            SendOutcome::PermanentFailure(reason) => (FailureKind::Permanent, reason),
        };

        entry.attempts = entry.attempts.saturating_add(1);
        entry.last_attempt_at = Some(now);
        entry.history.push(AttemptRecord {
            at: now,
            kind,
            reason: reason.clone(),
        });

        if kind == FailureKind::Permanent || !entry.is_retry_eligible() {
            let reason = match kind {
                FailureKind::Permanent => reason.clone(),
                FailureKind::Transient => {
                    format!("gave up after {} attempts: {}", entry.attempts, reason)
                }
            };
            let dead = self.bury(&mut state, entry, reason, now).await?;
            self.publish_depth(&state);
            return Ok(AttemptDisposition::DeadLettered(dead));
        }

        self.store.update_attempts(&entry).await?;
        state.in_flight.remove(&id);
        state.entries.insert(id, entry.clone());

        let retry_at = entry.next_attempt_at(&self.config.retry);
        warn!(
            "Attempt {}/{} for entry {} failed, retrying in {}ms: {}",
            entry.attempts,
            entry.max_attempts,
            id,
            retry_at.saturating_sub(now),
            reason
        );
        Ok(AttemptDisposition::Retry { entry, retry_at })
    }

    pub fn retry_eligible(entry: &QueueEntry) -> bool {
        entry.is_retry_eligible()
    }

    /// Cancel a pending entry
    pub async fn remove(&self, id: Uuid) -> QueueResult<Option<QueueEntry>> {
        let mut state = self.state.lock().await;
        if !state.entries.contains_key(&id) {
            return Ok(None);
        }
        self.store.delete(id).await?;
        let removed = state.detach(id);
        self.publish_depth(&state);
        Ok(removed)
    }

    pub async fn get(&self, id: Uuid) -> Option<QueueEntry> {
        self.state.lock().await.entries.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats {
            in_flight: state.in_flight.len(),
            dead_letters: state.dead_letters,
            total_enqueued: state.total_enqueued,
            total_sent: state.total_sent,
            ..Default::default()
        };
        for entry in state.entries.values() {
            *stats.pending_mut(entry.priority) += 1;
        }
        stats
    }

    /// Dead letters, newest first
    pub async fn dead_letters(&self) -> QueueResult<Vec<DeadLetter>> {
        self.store.load_dead_letters().await
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    async fn bury(
        &self,
        state: &mut QueueState,
        entry: QueueEntry,
        reason: String,
        now: u64,
    ) -> QueueResult<DeadLetter> {
        let dead = DeadLetter {
            entry,
            reason,
            dead_at: now,
        };
        let pruned = self
            .store
            .bury(&dead, self.config.max_dead_letters)
            .await?;
        self.note_buried(state, &dead, pruned);
        Ok(dead)
    }

    /// Apply a dead-lettering the store has already committed
    fn note_buried(&self, state: &mut QueueState, dead: &DeadLetter, pruned: u64) {
        state.detach(dead.entry.id);
        state.dead_letters = (state.dead_letters + 1).saturating_sub(pruned);

        recorder::record_dead_letter(dead.entry.priority.as_str());
        warn!(
            "Dead-lettered {} entry {} after {} attempts: {}",
            dead.entry.priority, dead.entry.id, dead.entry.attempts, dead.reason
        );
    }

    fn note_enqueued(&self, state: &mut QueueState, priority: Priority) {
        state.next_seq += 1;
        state.total_enqueued += 1;
        recorder::record_enqueued(priority.as_str());
        self.publish_depth(state);
    }

    fn publish_depth(&self, state: &QueueState) {
        for priority in Priority::ALL {
            recorder::set_queue_depth(priority.as_str(), state.depth(priority));
        }
    }
}
