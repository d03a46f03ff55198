use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("device error: {0}")]
    Device(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("operation not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, HardwareError>;
