//! Error types for the intercom codec

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while packing, unpacking or entropy coding a chunk.
///
/// On the receive path every one of these is treated as a lost packet.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Deflate failed: {0}")]
    DeflateFailed(String),

    #[error("Inflate failed: {0}")]
    InflateFailed(String),

    #[error("Packet truncated: {len} bytes, need at least {needed}")]
    Truncated { len: usize, needed: usize },

    #[error("Plane lengths sum to {declared} bytes but payload has {available}")]
    PlaneLengthMismatch { declared: usize, available: usize },

    #[error("Plane {plane} too large for the wire: {len} bytes")]
    PlaneTooLarge { plane: usize, len: usize },

    #[error("Shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Unsupported plane count: {0}")]
    InvalidPlaneCount(usize),

    #[error("Quantization step out of range: {0}")]
    StepOutOfRange(u32),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Socket configuration failed: {0}")]
    SocketConfig(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
