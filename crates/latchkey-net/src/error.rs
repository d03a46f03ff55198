use thiserror::Error;

/// Errors from the control-channel session.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("peer fingerprint not in pin set")]
    FingerprintMismatch,

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] latchkey_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, NetError>;
