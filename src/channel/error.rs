use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// The link is down right now; worth trying again later
    #[error("Transport error: {0}")]
    Transport(String),

    /// The far end refused the message; resending will not help
    #[error("Rejected: {0}")]
    Rejected(String),
}

pub type ChannelResult<T> = Result<T, ChannelError>;
