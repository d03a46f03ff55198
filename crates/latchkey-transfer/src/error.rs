use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no transfer in progress")]
    NotRunning,

    #[error("transfer already in progress")]
    AlreadyRunning,

    #[error("staging artifact not open")]
    NotOpen,

    #[error("position mismatch (expected={expected} received={received})")]
    PositionMismatch { expected: u64, received: u64 },

    #[error("image header rejected: {0}")]
    BadHeader(String),

    #[error("image does not fit (size={size} capacity={capacity})")]
    TooLarge { size: u64, capacity: u64 },

    #[error("digest mismatch (expected={expected} computed={computed})")]
    DigestMismatch { expected: String, computed: String },

    #[error("size mismatch (expected={expected} computed={computed})")]
    SizeMismatch { expected: u64, computed: u64 },

    #[error("already up to date")]
    UpToDate,

    #[error("flash backend: {0}")]
    Flash(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransferError>;
