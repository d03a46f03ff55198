use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Frame too large: {size} bytes (max {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("JSON error: {0}")]
    Json(String),

    // Token errors
    #[error("Invalid UID: {0}")]
    InvalidUid(String),

    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    // Session errors
    #[error("Not connected")]
    NotConnected,

    #[error("Fingerprint mismatch")]
    FingerprintMismatch,

    #[error("Session closed: {0}")]
    SessionClosed(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
