//! Mesh packet types

use crate::mesh::error::MeshDecodeError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default transmission unit of the mesh transport
pub const DEFAULT_MTU: usize = 512;

/// Default hop budget for new packets
pub const DEFAULT_TTL: u8 = 7;

/// Default window during which a packet id counts as a duplicate
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Size of a packet identifier on the wire
pub const PACKET_ID_LEN: usize = 8;

/// Opaque 8-byte packet identifier, stable across every hop
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PacketId([u8; PACKET_ID_LEN]);

impl PacketId {
    pub const fn new(bytes: [u8; PACKET_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketId({})", self.to_hex())
    }
}

/// Packet type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    Status = 1,
    Panic = 2,
    Message = 3,
    Ack = 4,
    Fragment = 5,
}

impl PacketType {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = MeshDecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(PacketType::Status),
            2 => Ok(PacketType::Panic),
            3 => Ok(PacketType::Message),
            4 => Ok(PacketType::Ack),
            5 => Ok(PacketType::Fragment),
            other => Err(MeshDecodeError::UnknownPacketType(other)),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketType::Status => "status",
            PacketType::Panic => "panic",
            PacketType::Message => "message",
            PacketType::Ack => "ack",
            PacketType::Fragment => "fragment",
        };
        f.write_str(name)
    }
}

/// One mesh protocol unit.
///
/// Packets are never mutated in place; relaying goes through
/// [`MeshPacket::decrement_ttl`], which returns a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshPacket {
    pub id: PacketId,
    pub kind: PacketType,
    pub source_id: String,
    /// `None` means broadcast
    pub target_id: Option<String>,
    pub ttl: u8,
    pub hop_count: u8,
    /// Creation instant, Unix milliseconds
    pub timestamp: u64,
    pub payload: Bytes,
}

impl MeshPacket {
    /// Create a broadcast packet with the default hop budget
    pub fn new(
        id: PacketId,
        kind: PacketType,
        source_id: impl Into<String>,
        timestamp: u64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            id,
            kind,
            source_id: source_id.into(),
            target_id: None,
            ttl: DEFAULT_TTL,
            hop_count: 0,
            timestamp,
            payload: payload.into(),
        }
    }

    /// Address the packet to a single device
    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.target_id.is_none()
    }

    pub fn is_addressed_to(&self, device_id: &str) -> bool {
        self.target_id.as_deref() == Some(device_id)
    }

    /// The packet as forwarded by one more hop
    pub fn decrement_ttl(&self) -> MeshPacket {
        MeshPacket {
            ttl: self.ttl.saturating_sub(1),
            hop_count: self.hop_count.saturating_add(1),
            ..self.clone()
        }
    }
}

/// A payload rebuilt from a complete set of fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledMessage {
    /// Id of the original (pre-fragmentation) packet
    pub group: PacketId,
    pub kind: PacketType,
    pub source_id: String,
    pub target_id: Option<String>,
    pub payload: Bytes,
}

/// Result of offering fragments to the reassembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    Complete(ReassembledMessage),
    Incomplete { received: usize, total: usize },
}

impl Reassembly {
    pub fn is_complete(&self) -> bool {
        matches!(self, Reassembly::Complete(_))
    }
}
