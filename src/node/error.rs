use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Queue error: {0}")]
    QueueError(#[from] crate::queue::QueueError),

    #[error("SMS error: {0}")]
    SmsError(#[from] crate::sms::SmsError),

    #[error("Mesh encode error: {0}")]
    MeshEncodeError(#[from] crate::mesh::MeshEncodeError),

    #[error("Mesh decode error: {0}")]
    MeshDecodeError(#[from] crate::mesh::MeshDecodeError),

    #[error("Channel error: {0}")]
    ChannelError(#[from] crate::channel::ChannelError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("Node is shut down")]
    ShutDown,
}

pub type NodeResult<T> = Result<T, NodeError>;
