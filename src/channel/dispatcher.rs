use crate::channel::transport::ChannelTransport;
use crate::channel::types::{
    Channel, ChannelPreference, DispatchResult, OutboundMessage, SendOutcome,
};
use crate::metrics::recorder::{self, SendTimer};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Routes outbound messages to registered channel transports.
///
/// Only one channel is attempted per dispatch: the first available one in the
/// entry's candidate order. Unavailable channels are skipped without an
/// attempt, and so are fallback channels that cannot carry the payload. An
/// entry pinned to one channel is always attempted there, so a payload that
/// channel can never carry fails permanently.
pub struct ChannelDispatcher {
    transports: DashMap<Channel, Arc<dyn ChannelTransport>>,
    send_timeout: Duration,
}

impl Default for ChannelDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

impl ChannelDispatcher {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            transports: DashMap::new(),
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Register a transport, replacing any previous one for its channel
    pub fn register(&self, transport: Arc<dyn ChannelTransport>) -> Option<Arc<dyn ChannelTransport>> {
        let channel = transport.channel();
        debug!("Registered {} transport", channel);
        self.transports.insert(channel, transport)
    }

    pub fn unregister(&self, channel: Channel) -> Option<Arc<dyn ChannelTransport>> {
        self.transports.remove(&channel).map(|(_, transport)| transport)
    }

    pub fn is_registered(&self, channel: Channel) -> bool {
        self.transports.contains_key(&channel)
    }

    /// Registered candidate channels for `preference`, in try order
    pub fn channel_order(&self, preference: ChannelPreference) -> Vec<Channel> {
        preference
            .candidates()
            .into_iter()
            .filter(|channel| self.is_registered(*channel))
            .collect()
    }

    /// Candidate channels usable right now
    pub fn available_channels(&self, preference: ChannelPreference) -> Vec<Channel> {
        self.channel_order(preference)
            .into_iter()
            .filter(|channel| {
                self.transport(*channel)
                    .map(|transport| transport.is_available())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Available candidates for `preference` that can carry `message`.
    /// A pinned channel is kept whatever its payload check says.
    pub fn routable_channels(
        &self,
        message: &OutboundMessage,
        preference: ChannelPreference,
    ) -> Vec<Channel> {
        let pinned = matches!(preference, ChannelPreference::Only(_));
        self.available_channels(preference)
            .into_iter()
            .filter(|channel| {
                pinned
                    || self
                        .transport(*channel)
                        .map(|transport| transport.accepts(message))
                        .unwrap_or(false)
            })
            .collect()
    }

    /// Send `message` over the first routable channel for `preference`
    pub async fn dispatch(
        &self,
        message: &OutboundMessage,
        preference: ChannelPreference,
        cancel: &CancellationToken,
    ) -> DispatchResult {
        if cancel.is_cancelled() {
            return DispatchResult::Cancelled;
        }

        match self.routable_channels(message, preference).first() {
            Some(channel) => self.attempt_send(*channel, message, cancel).await,
            None => {
                debug!(
                    "No {} channel available for entry {}",
                    preference, message.entry_id
                );
                DispatchResult::Unavailable
            }
        }
    }

    /// One bounded send on a specific channel
    pub async fn attempt_send(
        &self,
        channel: Channel,
        message: &OutboundMessage,
        cancel: &CancellationToken,
    ) -> DispatchResult {
        let Some(transport) = self.transport(channel) else {
            return DispatchResult::Unavailable;
        };
        if !transport.is_available() {
            return DispatchResult::Unavailable;
        }

        let timer = SendTimer::start(channel.as_str());
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Send of entry {} on {} cancelled", message.entry_id, channel);
                return DispatchResult::Cancelled;
            }
            result = tokio::time::timeout(self.send_timeout, transport.send(message)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => SendOutcome::TransientFailure(format!(
                        "{} send timed out after {:?}",
                        channel, self.send_timeout
                    )),
                }
            }
        };
        let elapsed = timer.stop();

        match &outcome {
            SendOutcome::Success => {
                debug!(
                    "Entry {} sent on {} in {:?}",
                    message.entry_id, channel, elapsed
                );
            }
            SendOutcome::TransientFailure(reason) | SendOutcome::PermanentFailure(reason) => {
                warn!(
                    "Send of entry {} on {} failed ({}): {}",
                    message.entry_id,
                    channel,
                    outcome.kind(),
                    reason
                );
                recorder::record_send_failure(channel.as_str(), outcome.kind());
            }
        }

        DispatchResult::Attempted { channel, outcome }
    }

    fn transport(&self, channel: Channel) -> Option<Arc<dyn ChannelTransport>> {
        self.transports
            .get(&channel)
            .map(|entry| entry.value().clone())
    }
}
