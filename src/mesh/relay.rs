//! Flood relay decisions for inbound mesh packets
//!
//! Every packet is either delivered to this device, rebroadcast to all peers
//! with one less hop of budget, or dropped. There is no path discovery: loop
//! prevention relies on the TTL bound and id deduplication alone.

use crate::clock::Clock;
use crate::mesh::codec::PacketCodec;
use crate::mesh::dedup::DeduplicationStore;
use crate::mesh::fragment::{Reassembler, DEFAULT_MAX_PENDING_GROUPS};
use crate::mesh::types::{MeshPacket, PacketId, PacketType, ReassembledMessage, Reassembly};
use crate::metrics::recorder;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    Duplicate,
    TtlExhausted,
    OwnPacket,
    Malformed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Duplicate => "duplicate",
            DropReason::TtlExhausted => "ttl_exhausted",
            DropReason::OwnPacket => "own_packet",
            DropReason::Malformed => "malformed",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with one received packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayDecision {
    /// Addressed to this device
    Deliver(MeshPacket),
    /// Rebroadcast this (already decremented) packet
    Relay(MeshPacket),
    Drop(DropReason),
}

/// Payload handed to the local application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshDelivery {
    /// Packet id, or the group id for reassembled payloads
    pub id: PacketId,
    pub kind: PacketType,
    pub source_id: String,
    pub broadcast: bool,
    pub payload: Bytes,
}

impl MeshDelivery {
    fn from_packet(packet: &MeshPacket) -> Self {
        Self {
            id: packet.id,
            kind: packet.kind,
            source_id: packet.source_id.clone(),
            broadcast: packet.is_broadcast(),
            payload: packet.payload.clone(),
        }
    }

    fn from_message(message: ReassembledMessage) -> Self {
        Self {
            id: message.group,
            kind: message.kind,
            broadcast: message.target_id.is_none(),
            source_id: message.source_id,
            payload: message.payload,
        }
    }
}

/// Everything that came out of handling one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundOutcome {
    pub decision: RelayDecision,
    pub delivery: Option<MeshDelivery>,
    /// Encoded frame to rebroadcast
    pub relay_frame: Option<Bytes>,
}

impl InboundOutcome {
    fn dropped(reason: DropReason) -> Self {
        Self {
            decision: RelayDecision::Drop(reason),
            delivery: None,
            relay_frame: None,
        }
    }
}

/// Relay statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayStats {
    pub packets_received: u64,
    pub packets_delivered: u64,
    pub packets_relayed: u64,
    pub dropped_duplicate: u64,
    pub dropped_ttl: u64,
    pub dropped_own: u64,
    pub malformed: u64,
}

impl RelayStats {
    pub fn total_dropped(&self) -> u64 {
        self.dropped_duplicate + self.dropped_ttl + self.dropped_own + self.malformed
    }
}

impl fmt::Display for RelayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Relay: {} rx, {} delivered, {} relayed, {} dropped",
            self.packets_received,
            self.packets_delivered,
            self.packets_relayed,
            self.total_dropped()
        )
    }
}

#[derive(Default)]
struct RelayStatsInner {
    packets_received: AtomicU64,
    packets_delivered: AtomicU64,
    packets_relayed: AtomicU64,
    dropped_duplicate: AtomicU64,
    dropped_ttl: AtomicU64,
    dropped_own: AtomicU64,
    malformed: AtomicU64,
}

impl RelayStatsInner {
    fn count_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Duplicate => &self.dropped_duplicate,
            DropReason::TtlExhausted => &self.dropped_ttl,
            DropReason::OwnPacket => &self.dropped_own,
            DropReason::Malformed => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct RelayEngine {
    local_id: String,
    codec: PacketCodec,
    dedup: Arc<DeduplicationStore>,
    clock: Arc<dyn Clock>,
    reassembler: Mutex<Reassembler>,
    stats: RelayStatsInner,
}

impl RelayEngine {
    pub fn new(
        local_id: impl Into<String>,
        dedup: Arc<DeduplicationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reassembler = Reassembler::new(dedup.window(), DEFAULT_MAX_PENDING_GROUPS);
        Self {
            local_id: local_id.into(),
            codec: PacketCodec::new(),
            dedup,
            clock,
            reassembler: Mutex::new(reassembler),
            stats: RelayStatsInner::default(),
        }
    }

    pub fn with_codec(mut self, codec: PacketCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Cap the number of partially received fragment groups
    pub fn with_fragment_limit(mut self, max_groups: usize) -> Self {
        self.reassembler = Mutex::new(Reassembler::new(self.dedup.window(), max_groups));
        self
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    /// Classify one packet.
    ///
    /// Checks run in a fixed order: duplicate, hop budget, own packet,
    /// addressed to us, otherwise relay. The duplicate check and the record
    /// that follows it happen under one lock.
    pub fn should_relay(&self, packet: &MeshPacket) -> RelayDecision {
        let now = self.clock.now_millis();
        let mut dedup = self.dedup.lock();

        if dedup.seen_at(&packet.id, now) {
            return RelayDecision::Drop(DropReason::Duplicate);
        }
        if packet.ttl == 0 {
            return RelayDecision::Drop(DropReason::TtlExhausted);
        }
        if packet.source_id == self.local_id {
            return RelayDecision::Drop(DropReason::OwnPacket);
        }
        if packet.is_addressed_to(&self.local_id) {
            dedup.record(packet.id, now);
            return RelayDecision::Deliver(packet.clone());
        }

        dedup.record(packet.id, now);
        RelayDecision::Relay(packet.decrement_ttl())
    }

    /// Remember a packet this device originated so echoes are suppressed
    pub fn note_outbound(&self, packet: &MeshPacket) {
        self.dedup.record(packet.id, self.clock.now_millis());
    }

    /// Decode, classify and process one inbound frame.
    ///
    /// Malformed frames are logged and dropped; they never surface as errors.
    pub fn handle_frame(&self, frame: &[u8]) -> InboundOutcome {
        self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
        recorder::record_packet_received();

        let packet = match self.codec.decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping malformed mesh frame ({} bytes): {}", frame.len(), e);
                self.stats.count_drop(DropReason::Malformed);
                recorder::record_packet_dropped(DropReason::Malformed.as_str());
                return InboundOutcome::dropped(DropReason::Malformed);
            }
        };

        let decision = self.should_relay(&packet);
        match &decision {
            RelayDecision::Drop(reason) => {
                debug!("Dropped packet {} ({})", packet.id, reason);
                self.stats.count_drop(*reason);
                recorder::record_packet_dropped(reason.as_str());
                InboundOutcome::dropped(*reason)
            }
            RelayDecision::Deliver(target) => {
                let delivery = self.deliver_locally(target);
                InboundOutcome {
                    decision,
                    delivery,
                    relay_frame: None,
                }
            }
            RelayDecision::Relay(next) => {
                let relay_frame = match self.codec.encode(next) {
                    Ok(frame) => {
                        self.stats.packets_relayed.fetch_add(1, Ordering::Relaxed);
                        recorder::record_packet_relayed();
                        debug!(
                            "Relaying packet {} from {} (ttl {} -> {})",
                            next.id, next.source_id, packet.ttl, next.ttl
                        );
                        Some(frame)
                    }
                    Err(e) => {
                        warn!("Cannot re-encode packet {} for relay: {}", next.id, e);
                        None
                    }
                };

                // broadcasts are also for us
                let delivery = if packet.is_broadcast() {
                    self.deliver_locally(&packet)
                } else {
                    None
                };

                InboundOutcome {
                    decision,
                    delivery,
                    relay_frame,
                }
            }
        }
    }

    /// Drop stale fragment groups; dedup entries age out on their own
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let groups = self.reassembler.lock().evict_expired(now);
        groups + self.dedup.evict_expired()
    }

    pub fn pending_fragment_groups(&self) -> usize {
        self.reassembler.lock().pending_groups()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            packets_received: self.stats.packets_received.load(Ordering::Relaxed),
            packets_delivered: self.stats.packets_delivered.load(Ordering::Relaxed),
            packets_relayed: self.stats.packets_relayed.load(Ordering::Relaxed),
            dropped_duplicate: self.stats.dropped_duplicate.load(Ordering::Relaxed),
            dropped_ttl: self.stats.dropped_ttl.load(Ordering::Relaxed),
            dropped_own: self.stats.dropped_own.load(Ordering::Relaxed),
            malformed: self.stats.malformed.load(Ordering::Relaxed),
        }
    }

    fn deliver_locally(&self, packet: &MeshPacket) -> Option<MeshDelivery> {
        let delivery = if packet.kind == PacketType::Fragment {
            let now = self.clock.now_millis();
            match self.reassembler.lock().accept(packet, now) {
                Ok(Reassembly::Complete(message)) => MeshDelivery::from_message(message),
                Ok(Reassembly::Incomplete { .. }) => return None,
                Err(e) => {
                    warn!("Discarding fragment {}: {}", packet.id, e);
                    return None;
                }
            }
        } else {
            MeshDelivery::from_packet(packet)
        };

        self.stats.packets_delivered.fetch_add(1, Ordering::Relaxed);
        recorder::record_packet_delivered(&delivery.kind.to_string());
        Some(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SequentialIds};
    use std::time::Duration;

    const LOCAL: &str = "phone-local";

    fn engine(clock: Arc<ManualClock>) -> RelayEngine {
        let dedup = Arc::new(DeduplicationStore::new(clock.clone()));
        RelayEngine::new(LOCAL, dedup, clock)
    }

    fn packet(n: u8, source: &str) -> MeshPacket {
        MeshPacket::new(
            PacketId::new([n; 8]),
            PacketType::Status,
            source,
            5_000,
            b"lat/lon".to_vec(),
        )
    }

    #[test]
    fn test_relay_decrements() {
        let relay = engine(Arc::new(ManualClock::new(0)));
        let inbound = packet(1, "phone-far");

        match relay.should_relay(&inbound) {
            RelayDecision::Relay(next) => {
                assert_eq!(next, inbound.decrement_ttl());
            }
            other => panic!("expected relay, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_is_dropped() {
        let relay = engine(Arc::new(ManualClock::new(0)));
        let inbound = packet(2, "phone-far");

        assert!(matches!(relay.should_relay(&inbound), RelayDecision::Relay(_)));
        assert_eq!(
            relay.should_relay(&inbound),
            RelayDecision::Drop(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_duplicate_forgotten_after_window() {
        let clock = Arc::new(ManualClock::new(0));
        let relay = engine(clock.clone());
        let inbound = packet(3, "phone-far");

        relay.should_relay(&inbound);
        clock.advance(Duration::from_millis(60_001));
        assert!(matches!(relay.should_relay(&inbound), RelayDecision::Relay(_)));
    }

    #[test]
    fn test_ttl_zero_is_dropped() {
        let relay = engine(Arc::new(ManualClock::new(0)));
        let inbound = packet(4, "phone-far").with_ttl(0);

        assert_eq!(
            relay.should_relay(&inbound),
            RelayDecision::Drop(DropReason::TtlExhausted)
        );
        // not recorded, so a fresh copy with budget is still accepted
        let retry = inbound.with_ttl(2);
        assert!(matches!(relay.should_relay(&retry), RelayDecision::Relay(_)));
    }

    #[test]
    fn test_own_packet_is_dropped() {
        let relay = engine(Arc::new(ManualClock::new(0)));
        assert_eq!(
            relay.should_relay(&packet(5, LOCAL)),
            RelayDecision::Drop(DropReason::OwnPacket)
        );
    }

    #[test]
    fn test_targeted_packet_is_delivered_once() {
        let relay = engine(Arc::new(ManualClock::new(0)));
        let inbound = packet(6, "phone-far").with_target(LOCAL);

        assert_eq!(
            relay.should_relay(&inbound),
            RelayDecision::Deliver(inbound.clone())
        );
        assert_eq!(
            relay.should_relay(&inbound),
            RelayDecision::Drop(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_duplicate_check_precedes_ttl() {
        let relay = engine(Arc::new(ManualClock::new(0)));
        let inbound = packet(7, "phone-far");
        relay.should_relay(&inbound);

        assert_eq!(
            relay.should_relay(&inbound.with_ttl(0)),
            RelayDecision::Drop(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_note_outbound_suppresses_echo() {
        let relay = engine(Arc::new(ManualClock::new(0)));
        let ours = packet(8, "phone-far");
        relay.note_outbound(&ours);

        assert_eq!(
            relay.should_relay(&ours),
            RelayDecision::Drop(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_handle_frame_broadcast_relays_and_delivers() {
        let relay = engine(Arc::new(ManualClock::new(0)));
        let codec = PacketCodec::new();
        let inbound = packet(9, "phone-far");

        let outcome = relay.handle_frame(&codec.encode(&inbound).unwrap());

        let frame = outcome.relay_frame.expect("relay frame");
        let relayed = codec.decode(&frame).unwrap();
        assert_eq!(relayed.ttl, inbound.ttl - 1);
        assert_eq!(relayed.hop_count, 1);

        let delivery = outcome.delivery.expect("broadcast delivery");
        assert!(delivery.broadcast);
        assert_eq!(delivery.payload, inbound.payload);
    }

    #[test]
    fn test_handle_frame_malformed() {
        let relay = engine(Arc::new(ManualClock::new(0)));
        let outcome = relay.handle_frame(&[1, 2, 3]);

        assert_eq!(outcome.decision, RelayDecision::Drop(DropReason::Malformed));
        assert_eq!(relay.stats().malformed, 1);
    }

    #[test]
    fn test_handle_frame_reassembles_targeted_fragments() {
        let relay = engine(Arc::new(ManualClock::new(0)));
        let codec = PacketCodec::new();
        let original = MeshPacket::new(
            PacketId::new([0x33; 8]),
            PacketType::Message,
            "phone-far",
            0,
            vec![4u8; 1_200],
        )
        .with_target(LOCAL);

        let fragments = codec
            .packetize(original.clone(), &SequentialIds::starting_at(1))
            .unwrap();
        assert!(fragments.len() > 1);

        let mut deliveries = Vec::new();
        for fragment in &fragments {
            let outcome = relay.handle_frame(&codec.encode(fragment).unwrap());
            assert!(outcome.relay_frame.is_none());
            deliveries.extend(outcome.delivery);
        }

        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].id, original.id);
        assert_eq!(deliveries[0].kind, PacketType::Message);
        assert_eq!(deliveries[0].payload, original.payload);
        assert_eq!(relay.stats().packets_delivered, 1);
    }

    #[test]
    fn test_stats_count_drops() {
        let relay = engine(Arc::new(ManualClock::new(0)));
        let codec = PacketCodec::new();
        let frame = codec.encode(&packet(10, "phone-far")).unwrap();

        relay.handle_frame(&frame);
        relay.handle_frame(&frame);

        let stats = relay.stats();
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.packets_relayed, 1);
        assert_eq!(stats.dropped_duplicate, 1);
    }
}
