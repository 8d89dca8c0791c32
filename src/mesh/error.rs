use thiserror::Error;

/// Errors produced while parsing mesh frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshDecodeError {
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Truncated payload: declared {declared} bytes, {available} available")]
    TruncatedPayload { declared: usize, available: usize },

    #[error("Unknown packet type tag: {0}")]
    UnknownPacketType(u8),

    #[error("Malformed fragment: {0}")]
    MalformedFragment(String),
}

/// Errors produced while building mesh frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshEncodeError {
    #[error("Frame of {size} bytes exceeds transmission unit of {mtu} bytes")]
    FrameTooLarge { size: usize, mtu: usize },

    #[error("Identifier too long: {len} bytes (max 255)")]
    IdentifierTooLong { len: usize },

    #[error("Payload needs {needed} fragments (max 65535)")]
    TooManyFragments { needed: usize },

    #[error("Invalid fragment chunk size: {0}")]
    InvalidChunkSize(usize),
}

pub type DecodeResult<T> = Result<T, MeshDecodeError>;
pub type EncodeResult<T> = Result<T, MeshEncodeError>;
