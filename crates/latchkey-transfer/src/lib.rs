//! Chunked transfer engine.
//!
//! Receives a file or firmware image as positioned chunks pushed over
//! the control channel, verifies the whole artifact against an
//! advertised digest and size, and only then replaces the previous
//! artifact. A failed or abandoned transfer must leave the previous
//! artifact untouched.

pub mod digest;
pub mod error;
pub mod file;
pub mod firmware;

pub use digest::{digest_bytes, digest_file};
pub use error::{Result, TransferError};
pub use file::FileWriter;
pub use firmware::{FirmwareWriter, FlashBackend, MockFlash, image_size_from_header};
