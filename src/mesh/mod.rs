//! Device-to-device flood mesh
//!
//! Frames are small (a few hundred bytes) and carried by short-range radio
//! links. Every node rebroadcasts what it has not seen before until the hop
//! budget runs out.

pub mod codec;
pub mod dedup;
pub mod error;
pub mod fragment;
pub mod relay;
pub mod types;

pub use codec::PacketCodec;
pub use dedup::{DeduplicationStore, DEFAULT_MAX_DEDUP_ENTRIES};
pub use error::{DecodeResult, EncodeResult, MeshDecodeError, MeshEncodeError};
pub use fragment::{reassemble, FragmentHeader, Reassembler};
pub use relay::{DropReason, InboundOutcome, MeshDelivery, RelayDecision, RelayEngine, RelayStats};
pub use types::{
    MeshPacket, PacketId, PacketType, ReassembledMessage, Reassembly, DEFAULT_DEDUP_WINDOW,
    DEFAULT_MTU, DEFAULT_TTL,
};
