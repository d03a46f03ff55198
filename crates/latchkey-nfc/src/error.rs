use thiserror::Error;

#[derive(Error, Debug)]
pub enum NfcError {
    /// The reader chip returned a negative or malformed response.
    /// Always forces the engine back to the reset path.
    #[error("Reader transport error: {0}")]
    Transport(String),

    /// A bounded-timeout primitive call expired without a response.
    #[error("Reader timed out")]
    Timeout,

    /// An operation was attempted while the reader is not ready.
    #[error("Reader not ready")]
    NotReady,
}

pub type Result<T> = std::result::Result<T, NfcError>;
