use crate::channel::error::ChannelResult;
use crate::channel::types::{Channel, OutboundMessage, SendOutcome};
use async_trait::async_trait;
use bytes::Bytes;

/// One delivery channel as seen by the dispatcher.
///
/// `send` is a suspension point: it resolves once the underlying transport
/// reports completion. The dispatcher bounds it with a timeout.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn channel(&self) -> Channel;

    /// Whether the channel is usable in the current device state
    fn is_available(&self) -> bool;

    /// Whether this channel can ever carry `message`. Fallback routing skips
    /// channels that cannot, instead of spending an attempt on them.
    fn accepts(&self, _message: &OutboundMessage) -> bool {
        true
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome;
}

/// Short-range radio that broadcasts frames to every peer in range
#[async_trait]
pub trait MeshRadio: Send + Sync {
    /// At least one peer is connected
    fn has_peers(&self) -> bool;

    /// Largest frame the link accepts
    fn mtu(&self) -> usize;

    async fn broadcast(&self, frame: Bytes) -> ChannelResult<()>;
}

/// Cellular SMS sender
#[async_trait]
pub trait SmsGateway: Send + Sync {
    fn has_signal(&self) -> bool;

    async fn send_sms(&self, recipient: &str, body: &str) -> ChannelResult<()>;
}
