//! Fragment headers and reassembly
//!
//! A fragment packet's payload starts with:
//!
//! ```text
//! group(8) inner_type(1) index(2) total(2) chunk...
//! ```

use crate::mesh::error::{DecodeResult, MeshDecodeError};
use crate::mesh::types::{
    MeshPacket, PacketId, PacketType, ReassembledMessage, Reassembly, DEFAULT_DEDUP_WINDOW,
    PACKET_ID_LEN,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

pub const FRAGMENT_HEADER_LEN: usize = PACKET_ID_LEN + 1 + 2 + 2;

/// Default cap on partially received groups held at once
pub const DEFAULT_MAX_PENDING_GROUPS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub group: PacketId,
    pub inner_kind: PacketType,
    pub index: u16,
    pub total: u16,
}

impl FragmentHeader {
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(self.group.as_bytes());
        buf.put_u8(self.inner_kind.tag());
        buf.put_u16(self.index);
        buf.put_u16(self.total);
    }

    /// Split a fragment payload into its header and data chunk
    pub fn parse(payload: &Bytes) -> DecodeResult<(FragmentHeader, Bytes)> {
        if payload.len() < FRAGMENT_HEADER_LEN {
            return Err(MeshDecodeError::MalformedFragment(format!(
                "payload is {} bytes, fragment header needs {}",
                payload.len(),
                FRAGMENT_HEADER_LEN
            )));
        }

        let mut buf = &payload[..FRAGMENT_HEADER_LEN];
        let mut group = [0u8; PACKET_ID_LEN];
        buf.copy_to_slice(&mut group);
        let inner_kind = PacketType::try_from(buf.get_u8())?;
        let index = buf.get_u16();
        let total = buf.get_u16();

        if inner_kind == PacketType::Fragment {
            return Err(MeshDecodeError::MalformedFragment(
                "nested fragment".into(),
            ));
        }
        if total == 0 || index >= total {
            return Err(MeshDecodeError::MalformedFragment(format!(
                "index {} out of range for {} fragments",
                index, total
            )));
        }

        let header = FragmentHeader {
            group: PacketId::new(group),
            inner_kind,
            index,
            total,
        };
        Ok((header, payload.slice(FRAGMENT_HEADER_LEN..)))
    }
}

struct PendingGroup {
    kind: PacketType,
    source_id: String,
    target_id: Option<String>,
    total: u16,
    chunks: BTreeMap<u16, Bytes>,
    first_seen: u64,
}

/// Buffers fragments per group until every index has arrived.
///
/// Memory is bounded twice over: groups older than the window are dropped,
/// and at most `max_groups` groups are held (oldest evicted first).
pub struct Reassembler {
    window: Duration,
    max_groups: usize,
    groups: HashMap<PacketId, PendingGroup>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW, DEFAULT_MAX_PENDING_GROUPS)
    }
}

impl Reassembler {
    pub fn new(window: Duration, max_groups: usize) -> Self {
        Self {
            window,
            max_groups: max_groups.max(1),
            groups: HashMap::new(),
        }
    }

    /// Offer one fragment packet received at `now` (Unix millis)
    pub fn accept(&mut self, fragment: &MeshPacket, now: u64) -> DecodeResult<Reassembly> {
        if fragment.kind != PacketType::Fragment {
            return Err(MeshDecodeError::MalformedFragment(format!(
                "{} packet offered for reassembly",
                fragment.kind
            )));
        }
        let (header, chunk) = FragmentHeader::parse(&fragment.payload)?;

        self.evict_expired(now);

        if !self.groups.contains_key(&header.group) && self.groups.len() >= self.max_groups {
            self.evict_oldest();
        }

        let group = self
            .groups
            .entry(header.group)
            .or_insert_with(|| PendingGroup {
                kind: header.inner_kind,
                source_id: fragment.source_id.clone(),
                target_id: fragment.target_id.clone(),
                total: header.total,
                chunks: BTreeMap::new(),
                first_seen: now,
            });

        if group.total != header.total || group.kind != header.inner_kind {
            return Err(MeshDecodeError::MalformedFragment(format!(
                "group {} expects {} {} fragments, got {} of {}",
                header.group, group.total, group.kind, header.inner_kind, header.total
            )));
        }

        group.chunks.insert(header.index, chunk);
        let received = group.chunks.len();
        let total = group.total as usize;

        if received < total {
            debug!(
                "Fragment {}/{} buffered for group {}",
                header.index + 1,
                total,
                header.group
            );
            return Ok(Reassembly::Incomplete { received, total });
        }

        // all indices 0..total present: BTreeMap keys are unique and < total
        let Some(group) = self.groups.remove(&header.group) else {
            return Ok(Reassembly::Incomplete { received, total });
        };
        let size = group.chunks.values().map(Bytes::len).sum();
        let mut payload = BytesMut::with_capacity(size);
        for chunk in group.chunks.values() {
            payload.put_slice(chunk);
        }

        debug!("Reassembled group {} from {} fragments", header.group, total);
        Ok(Reassembly::Complete(ReassembledMessage {
            group: header.group,
            kind: group.kind,
            source_id: group.source_id,
            target_id: group.target_id,
            payload: payload.freeze(),
        }))
    }

    /// Drop groups first seen more than one window ago
    pub fn evict_expired(&mut self, now: u64) -> usize {
        let window = self.window.as_millis() as u64;
        let before = self.groups.len();
        self.groups
            .retain(|_, group| now.saturating_sub(group.first_seen) <= window);
        let evicted = before - self.groups.len();
        if evicted > 0 {
            debug!("Discarded {} incomplete fragment groups", evicted);
        }
        evicted
    }

    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .groups
            .iter()
            .min_by_key(|(_, group)| group.first_seen)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            self.groups.remove(&id);
            debug!("Fragment buffer full, dropped group {}", id);
        }
    }
}

/// Reassemble a set of fragments in one go
pub fn reassemble(fragments: &[MeshPacket], now: u64) -> DecodeResult<Reassembly> {
    let mut reassembler = Reassembler::default();
    let mut last = Reassembly::Incomplete {
        received: 0,
        total: 0,
    };
    for fragment in fragments {
        last = reassembler.accept(fragment, now)?;
        if last.is_complete() {
            break;
        }
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SequentialIds;
    use crate::mesh::codec::PacketCodec;

    fn split(payload: Vec<u8>, chunk: usize) -> (MeshPacket, Vec<MeshPacket>) {
        let original = MeshPacket::new(
            PacketId::new([0x11; 8]),
            PacketType::Panic,
            "phone-1",
            1_000,
            payload,
        );
        let fragments = PacketCodec::new()
            .fragment(&original, chunk, &SequentialIds::starting_at(1))
            .unwrap();
        (original, fragments)
    }

    #[test]
    fn test_reassemble_in_order() {
        let (original, fragments) = split((0..200u8).collect(), 64);

        match reassemble(&fragments, 1_000).unwrap() {
            Reassembly::Complete(message) => {
                assert_eq!(message.group, original.id);
                assert_eq!(message.kind, PacketType::Panic);
                assert_eq!(message.source_id, "phone-1");
                assert_eq!(message.payload, original.payload);
            }
            other => panic!("expected complete, got {:?}", other),
        }
    }

    #[test]
    fn test_reassemble_out_of_order() {
        let (original, mut fragments) = split((0..200u8).collect(), 64);
        fragments.reverse();

        let result = reassemble(&fragments, 1_000).unwrap();
        assert!(matches!(result, Reassembly::Complete(m) if m.payload == original.payload));
    }

    #[test]
    fn test_incomplete_until_all_indices() {
        let (_, fragments) = split(vec![1u8; 300], 100);
        let mut reassembler = Reassembler::default();

        assert_eq!(
            reassembler.accept(&fragments[0], 0).unwrap(),
            Reassembly::Incomplete {
                received: 1,
                total: 3
            }
        );
        // duplicate index does not count twice
        assert_eq!(
            reassembler.accept(&fragments[0], 0).unwrap(),
            Reassembly::Incomplete {
                received: 1,
                total: 3
            }
        );
        assert!(!reassembler.accept(&fragments[2], 0).unwrap().is_complete());
        assert!(reassembler.accept(&fragments[1], 0).unwrap().is_complete());
        assert_eq!(reassembler.pending_groups(), 0);
    }

    #[test]
    fn test_stale_groups_are_discarded() {
        let (_, fragments) = split(vec![1u8; 300], 100);
        let mut reassembler = Reassembler::new(Duration::from_secs(60), 8);

        reassembler.accept(&fragments[0], 0).unwrap();
        assert_eq!(reassembler.pending_groups(), 1);

        assert_eq!(reassembler.evict_expired(60_001), 1);
        assert_eq!(reassembler.pending_groups(), 0);

        // late fragments start a fresh, incomplete group
        assert!(!reassembler.accept(&fragments[1], 60_002).unwrap().is_complete());
    }

    #[test]
    fn test_group_cap_evicts_oldest() {
        let mut reassembler = Reassembler::new(Duration::from_secs(60), 2);
        let ids = SequentialIds::starting_at(50);
        let codec = PacketCodec::new();

        for (n, at) in [(1u8, 10u64), (2, 20), (3, 30)] {
            let original = MeshPacket::new(
                PacketId::new([n; 8]),
                PacketType::Message,
                "phone-1",
                at,
                vec![n; 20],
            );
            let fragments = codec.fragment(&original, 10, &ids).unwrap();
            reassembler.accept(&fragments[0], at).unwrap();
        }

        assert_eq!(reassembler.pending_groups(), 2);
    }

    #[test]
    fn test_rejects_non_fragment() {
        let packet = MeshPacket::new(
            PacketId::new([0; 8]),
            PacketType::Status,
            "a",
            0,
            Vec::<u8>::new(),
        );
        let result = Reassembler::default().accept(&packet, 0);
        assert!(matches!(result, Err(MeshDecodeError::MalformedFragment(_))));
    }

    #[test]
    fn test_rejects_short_fragment_header() {
        let packet = MeshPacket::new(
            PacketId::new([0; 8]),
            PacketType::Fragment,
            "a",
            0,
            vec![1, 2, 3],
        );
        let result = Reassembler::default().accept(&packet, 0);
        assert!(matches!(result, Err(MeshDecodeError::MalformedFragment(_))));
    }
}
