use crate::channel::Channel;
use crate::mesh::{MeshDelivery, RelayStats};
use crate::queue::{DeadLetter, QueueStats};
use crate::sms::SmsPayload;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Events published to the host application
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// Mesh payload addressed to (or broadcast past) this device
    MeshDelivery(MeshDelivery),
    /// Status report decoded from an inbound SMS or mesh payload
    StatusReceived(SmsPayload),
    EntrySent { entry_id: Uuid, channel: Channel },
    DeadLettered(DeadLetter),
}

/// Tally of one flush pass over the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub sent: usize,
    /// Failed transiently and kept for another attempt
    pub retried: usize,
    pub dead_lettered: usize,
    /// No channel was available; returned to the queue untouched
    pub deferred: usize,
    /// Interrupted by shutdown; returned to the queue untouched
    pub cancelled: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.sent + self.retried + self.dead_lettered + self.deferred + self.cancelled
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for FlushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sent, {} retried, {} dead-lettered, {} deferred, {} cancelled",
            self.sent, self.retried, self.dead_lettered, self.deferred, self.cancelled
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStats {
    pub node_id: String,
    pub queue: QueueStats,
    pub relay: RelayStats,
    pub relay_throttled: u64,
    pub relay_broadcast_failures: u64,
    /// Events discarded because the receiver was full or gone
    pub events_dropped: u64,
}
