//! Mesh wire codec
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! id(8) type(1) ttl(1) hops(1) timestamp(8)
//! source_len(1) source(source_len)
//! has_target(1) [target_len(1) target(target_len)]
//! payload_len(2) payload(payload_len)
//! ```
//!
//! A frame never exceeds the codec's transmission unit. Payloads that do not
//! fit are split with [`PacketCodec::fragment`] first.

use crate::clock::IdSource;
use crate::mesh::error::{DecodeResult, EncodeResult, MeshDecodeError, MeshEncodeError};
use crate::mesh::fragment::{FragmentHeader, FRAGMENT_HEADER_LEN};
use crate::mesh::types::{MeshPacket, PacketId, PacketType, DEFAULT_MTU, PACKET_ID_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Header bytes present in every frame (empty source, no target)
pub const FIXED_HEADER_LEN: usize = PACKET_ID_LEN + 1 + 1 + 1 + 8 + 1 + 1;

const PAYLOAD_LEN_FIELD: usize = 2;
const MAX_ID_LEN: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    mtu: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCodec {
    pub fn new() -> Self {
        Self { mtu: DEFAULT_MTU }
    }

    pub fn with_mtu(mtu: usize) -> Self {
        Self { mtu }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Bytes taken by everything except the payload
    pub fn header_len(source_id: &str, target_id: Option<&str>) -> usize {
        FIXED_HEADER_LEN
            + source_id.len()
            + target_id.map(|t| 1 + t.len()).unwrap_or(0)
            + PAYLOAD_LEN_FIELD
    }

    /// Full size of the packet on the wire
    pub fn encoded_len(packet: &MeshPacket) -> usize {
        Self::header_len(&packet.source_id, packet.target_id.as_deref()) + packet.payload.len()
    }

    /// Usable payload capacity of one frame for the given addressing
    pub fn max_payload(&self, source_id: &str, target_id: Option<&str>) -> usize {
        self.mtu
            .saturating_sub(Self::header_len(source_id, target_id))
            .min(u16::MAX as usize)
    }

    /// Serialize a packet into one frame
    pub fn encode(&self, packet: &MeshPacket) -> EncodeResult<Bytes> {
        check_id_len(&packet.source_id)?;
        if let Some(target) = &packet.target_id {
            check_id_len(target)?;
        }

        let size = Self::encoded_len(packet);
        if size > self.mtu || packet.payload.len() > u16::MAX as usize {
            return Err(MeshEncodeError::FrameTooLarge {
                size,
                mtu: self.mtu,
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_slice(packet.id.as_bytes());
        buf.put_u8(packet.kind.tag());
        buf.put_u8(packet.ttl);
        buf.put_u8(packet.hop_count);
        buf.put_u64(packet.timestamp);

        buf.put_u8(packet.source_id.len() as u8);
        buf.put_slice(packet.source_id.as_bytes());

        match &packet.target_id {
            Some(target) => {
                buf.put_u8(1);
                buf.put_u8(target.len() as u8);
                buf.put_slice(target.as_bytes());
            }
            None => buf.put_u8(0),
        }

        buf.put_u16(packet.payload.len() as u16);
        buf.put_slice(&packet.payload);

        Ok(buf.freeze())
    }

    /// Parse one frame. Bytes after the declared payload are ignored.
    pub fn decode(&self, frame: &[u8]) -> DecodeResult<MeshPacket> {
        if frame.len() < FIXED_HEADER_LEN {
            return Err(MeshDecodeError::MalformedHeader(format!(
                "frame is {} bytes, header needs {}",
                frame.len(),
                FIXED_HEADER_LEN
            )));
        }

        let mut buf = frame;

        let mut id = [0u8; PACKET_ID_LEN];
        buf.copy_to_slice(&mut id);
        let kind = PacketType::try_from(buf.get_u8())?;
        let ttl = buf.get_u8();
        let hop_count = buf.get_u8();
        let timestamp = buf.get_u64();

        let source_id = read_identifier(&mut buf, "source")?;

        if !buf.has_remaining() {
            return Err(MeshDecodeError::MalformedHeader(
                "missing target flag".into(),
            ));
        }
        let target_id = match buf.get_u8() {
            0 => None,
            1 => {
                if !buf.has_remaining() {
                    return Err(MeshDecodeError::MalformedHeader(
                        "missing target length".into(),
                    ));
                }
                Some(read_identifier(&mut buf, "target")?)
            }
            flag => {
                return Err(MeshDecodeError::MalformedHeader(format!(
                    "invalid target flag {}",
                    flag
                )))
            }
        };

        if buf.remaining() < PAYLOAD_LEN_FIELD {
            return Err(MeshDecodeError::MalformedHeader(
                "missing payload length".into(),
            ));
        }
        let declared = buf.get_u16() as usize;
        if declared > buf.remaining() {
            return Err(MeshDecodeError::TruncatedPayload {
                declared,
                available: buf.remaining(),
            });
        }
        let payload = Bytes::copy_from_slice(&buf[..declared]);

        Ok(MeshPacket {
            id: PacketId::new(id),
            kind,
            source_id,
            target_id,
            ttl,
            hop_count,
            timestamp,
            payload,
        })
    }

    /// Split `packet`'s payload into fragment packets carrying at most
    /// `max_chunk` payload bytes each.
    ///
    /// The original packet id becomes the group id; every fragment gets a
    /// fresh id of its own so deduplication keeps them apart.
    pub fn fragment(
        &self,
        packet: &MeshPacket,
        max_chunk: usize,
        ids: &dyn IdSource,
    ) -> EncodeResult<Vec<MeshPacket>> {
        if max_chunk == 0 {
            return Err(MeshEncodeError::InvalidChunkSize(max_chunk));
        }

        let needed = packet.payload.len().div_ceil(max_chunk).max(1);
        if needed > u16::MAX as usize {
            return Err(MeshEncodeError::TooManyFragments { needed });
        }
        let total = needed as u16;

        let chunks: Vec<&[u8]> = if packet.payload.is_empty() {
            vec![&[]]
        } else {
            packet.payload.chunks(max_chunk).collect()
        };

        let fragments = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let header = FragmentHeader {
                    group: packet.id,
                    inner_kind: packet.kind,
                    index: index as u16,
                    total,
                };
                let mut payload = BytesMut::with_capacity(FRAGMENT_HEADER_LEN + chunk.len());
                header.write(&mut payload);
                payload.put_slice(chunk);

                MeshPacket {
                    id: ids.next_packet_id(),
                    kind: PacketType::Fragment,
                    payload: payload.freeze(),
                    ..packet.clone()
                }
            })
            .collect();

        Ok(fragments)
    }

    /// The packet itself if it fits one frame, otherwise its fragments
    pub fn packetize(&self, packet: MeshPacket, ids: &dyn IdSource) -> EncodeResult<Vec<MeshPacket>> {
        check_id_len(&packet.source_id)?;
        if let Some(target) = &packet.target_id {
            check_id_len(target)?;
        }

        if Self::encoded_len(&packet) <= self.mtu {
            return Ok(vec![packet]);
        }

        let capacity = self.max_payload(&packet.source_id, packet.target_id.as_deref());
        if capacity <= FRAGMENT_HEADER_LEN {
            return Err(MeshEncodeError::FrameTooLarge {
                size: Self::encoded_len(&packet),
                mtu: self.mtu,
            });
        }

        self.fragment(&packet, capacity - FRAGMENT_HEADER_LEN, ids)
    }
}

fn check_id_len(id: &str) -> EncodeResult<()> {
    if id.len() > MAX_ID_LEN {
        return Err(MeshEncodeError::IdentifierTooLong { len: id.len() });
    }
    Ok(())
}

fn read_identifier(buf: &mut &[u8], field: &str) -> DecodeResult<String> {
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        return Err(MeshDecodeError::MalformedHeader(format!(
            "{} id declares {} bytes, {} remain",
            field,
            len,
            buf.remaining()
        )));
    }
    let raw = &buf[..len];
    let id = std::str::from_utf8(raw)
        .map_err(|_| MeshDecodeError::MalformedHeader(format!("{} id is not UTF-8", field)))?
        .to_string();
    buf.advance(len);
    Ok(id)
}
