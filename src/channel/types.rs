use crate::channel::error::ChannelError;
use crate::queue::types::{Priority, QueueEntry, QueuePayload};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Physical delivery channels, in fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Data,
    Mesh,
    Sms,
    Satellite,
}

impl Channel {
    /// Order tried for entries that accept any channel
    pub const FALLBACK_ORDER: [Channel; 4] =
        [Channel::Data, Channel::Mesh, Channel::Sms, Channel::Satellite];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Data => "data",
            Channel::Mesh => "mesh",
            Channel::Sms => "sms",
            Channel::Satellite => "satellite",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::FALLBACK_ORDER
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ChannelError::UnknownChannel(s.to_string()))
    }
}

/// Channel choice stored with each queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelPreference {
    #[default]
    Any,
    Only(Channel),
}

impl ChannelPreference {
    /// Channels to consider, most preferred first
    pub fn candidates(&self) -> Vec<Channel> {
        match self {
            ChannelPreference::Any => Channel::FALLBACK_ORDER.to_vec(),
            ChannelPreference::Only(channel) => vec![*channel],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelPreference::Any => "any",
            ChannelPreference::Only(channel) => channel.as_str(),
        }
    }
}

impl fmt::Display for ChannelPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelPreference {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("any") {
            return Ok(ChannelPreference::Any);
        }
        s.parse().map(ChannelPreference::Only)
    }
}

impl From<Channel> for ChannelPreference {
    fn from(channel: Channel) -> Self {
        ChannelPreference::Only(channel)
    }
}

/// Result of one transmission attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    /// Retry-eligible (timeouts, link loss)
    TransientFailure(String),
    /// Never retried (codec rejection, bad recipient)
    PermanentFailure(String),
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SendOutcome::Success => "success",
            SendOutcome::TransientFailure(_) => "transient",
            SendOutcome::PermanentFailure(_) => "permanent",
        }
    }
}

impl From<ChannelError> for SendOutcome {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Rejected(_) | ChannelError::UnknownChannel(_) => {
                SendOutcome::PermanentFailure(err.to_string())
            }
            ChannelError::Transport(_) => SendOutcome::TransientFailure(err.to_string()),
        }
    }
}

/// What a transport is asked to carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub entry_id: Uuid,
    pub priority: Priority,
    pub payload: QueuePayload,
    /// 1-based number of this attempt
    pub attempt: u32,
}

impl From<&QueueEntry> for OutboundMessage {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            entry_id: entry.id,
            priority: entry.priority,
            payload: entry.payload.clone(),
            attempt: entry.attempts + 1,
        }
    }
}

/// Result of one dispatch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// A send was attempted on `channel`
    Attempted {
        channel: Channel,
        outcome: SendOutcome,
    },
    /// No candidate channel was available; no attempt was made
    Unavailable,
    /// Shutdown interrupted the send; no attempt is counted
    Cancelled,
}
