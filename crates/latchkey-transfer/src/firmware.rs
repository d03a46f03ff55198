//! Firmware image transfers.
//!
//! Unlike file transfers, firmware chunks must arrive strictly in
//! order: the flash layer only has a forward cursor. The first chunk
//! is vetted before a single byte reaches flash (magic byte, declared
//! flash size versus real capacity), because the staging area for a
//! firmware image is the spare image slot itself and a garbage header
//! would brick the next boot.

use tracing::{debug, info, warn};

use crate::error::{Result, TransferError};

/// First byte of a valid image header.
pub const IMAGE_MAGIC: u8 = 0xE9;

/// Declared flash size from the high nibble of header byte 3.
/// Unlisted nibbles decode to 0, which never fits.
#[must_use]
pub fn image_size_from_header(nibble: u8) -> u64 {
    match nibble & 0x0F {
        0x0 => 512 * 1024,
        0x1 => 256 * 1024,
        0x2 => 1024 * 1024,
        0x3 => 2 * 1024 * 1024,
        0x4 => 4 * 1024 * 1024,
        0x8 => 8 * 1024 * 1024,
        0x9 => 16 * 1024 * 1024,
        _ => 0,
    }
}

/// The platform flash/update layer.
///
/// `begin`/`write`/`end` mirror an A/B update manager: bytes stream
/// into the inactive slot and `end` runs the manager's own integrity
/// check before arming the new image for the next boot.
pub trait FlashBackend {
    /// Real flash capacity in bytes.
    fn capacity(&self) -> u64;
    /// Space available for a new image.
    fn free_space(&self) -> u64;
    /// Digest of the currently-running image.
    fn current_digest(&self) -> String;
    fn begin(&mut self, size: u64, digest: &str) -> Result<()>;
    fn write(&mut self, data: &[u8]) -> Result<()>;
    fn end(&mut self) -> Result<()>;
    /// Last error reported by the update manager, for error replies.
    fn last_error(&self) -> Option<String>;
}

/// Receives one firmware image at a time.
#[derive(Debug)]
pub struct FirmwareWriter<B> {
    backend: B,
    expected_digest: String,
    expected_size: u64,
    position: u64,
    started: bool,
}

impl<B: FlashBackend> FirmwareWriter<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            expected_digest: String::new(),
            expected_size: 0,
            position: 0,
            started: false,
        }
    }

    /// Record the expectations for a new image. Refused while a
    /// transfer is streaming; the server must abort or commit first.
    pub fn begin(&mut self, digest: &str, size: u64) -> Result<()> {
        if self.started {
            return Err(TransferError::AlreadyRunning);
        }
        self.expected_digest = digest.to_string();
        self.expected_size = size;
        self.position = 0;
        Ok(())
    }

    /// True when the offered image is what is already running.
    pub fn up_to_date(&self) -> bool {
        self.backend.current_digest() == self.expected_digest
    }

    /// Pre-flight before the first chunk: reject an image that is
    /// already installed or does not fit the spare slot.
    pub fn open(&mut self) -> Result<()> {
        if self.up_to_date() {
            return Err(TransferError::UpToDate);
        }
        if self.expected_size > self.backend.free_space() {
            return Err(TransferError::TooLarge {
                size: self.expected_size,
                capacity: self.backend.free_space(),
            });
        }
        self.position = 0;
        Ok(())
    }

    /// Write one chunk. `position` must equal the running cursor.
    pub fn add(&mut self, data: &[u8], position: u64) -> Result<()> {
        if position != self.position {
            warn!(
                expected = self.position,
                received = position,
                "firmware position mismatch"
            );
            return Err(TransferError::PositionMismatch {
                expected: self.position,
                received: position,
            });
        }

        if self.position == 0 && !self.started {
            self.check_header(data)?;
            self.backend
                .begin(self.expected_size, &self.expected_digest)?;
            self.started = true;
        }
        if !self.started {
            return Err(TransferError::NotRunning);
        }

        self.backend.write(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    fn check_header(&self, data: &[u8]) -> Result<()> {
        if data.len() < 4 {
            return Err(TransferError::BadHeader(
                "need at least 4 bytes to check the image header".to_string(),
            ));
        }
        if data[0] != IMAGE_MAGIC {
            return Err(TransferError::BadHeader(format!(
                "magic byte is {:#04x}, not {IMAGE_MAGIC:#04x}",
                data[0]
            )));
        }
        let declared = image_size_from_header(data[3] >> 4);
        if declared > self.backend.capacity() {
            return Err(TransferError::TooLarge {
                size: declared,
                capacity: self.backend.capacity(),
            });
        }
        debug!(declared, "image header accepted");
        Ok(())
    }

    /// Finalize the image. The backend runs its own digest check and
    /// arms the new image only on success.
    pub fn commit(&mut self) -> Result<()> {
        if !self.started {
            return Err(TransferError::NotRunning);
        }
        self.started = false;
        self.backend.end()?;
        info!(size = self.position, "firmware committed");
        Ok(())
    }

    /// Abandon the image. Deliberately feeds the backend corrupt
    /// trailing bytes first so its integrity check can never pass on
    /// the half-written image. Safe to call when idle.
    pub fn abort(&mut self) {
        if self.started {
            self.backend.write(b"_ABORT_").ok();
            self.backend.end().ok();
            self.expected_digest.clear();
            self.expected_size = 0;
            self.position = 0;
            self.started = false;
        }
    }

    pub fn running(&self) -> bool {
        self.started
    }

    /// Percent received, for install progress logs.
    pub fn progress(&self) -> u8 {
        if self.expected_size > 0 {
            (100 * self.position / self.expected_size) as u8
        } else {
            0
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn updater_error(&self) -> Option<String> {
        self.backend.last_error()
    }
}

/// In-memory flash for tests and the emulated hardware profile.
#[derive(Debug)]
pub struct MockFlash {
    capacity: u64,
    free_space: u64,
    current_digest: String,
    expected_digest: String,
    written: Vec<u8>,
    begun: bool,
    finalized: bool,
    last_error: Option<String>,
}

impl MockFlash {
    pub fn new(capacity: u64, free_space: u64) -> Self {
        Self {
            capacity,
            free_space,
            current_digest: String::new(),
            expected_digest: String::new(),
            written: Vec::new(),
            begun: false,
            finalized: false,
            last_error: None,
        }
    }

    pub fn with_current_digest(mut self, digest: impl Into<String>) -> Self {
        self.current_digest = digest.into();
        self
    }

    /// Whether a new image was verified and armed.
    pub fn finalized(&self) -> bool {
        self.finalized
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }
}

impl FlashBackend for MockFlash {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn free_space(&self) -> u64 {
        self.free_space
    }

    fn current_digest(&self) -> String {
        self.current_digest.clone()
    }

    fn begin(&mut self, _size: u64, digest: &str) -> Result<()> {
        self.expected_digest = digest.to_string();
        self.written.clear();
        self.begun = true;
        self.finalized = false;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.begun {
            self.last_error = Some("write before begin".to_string());
            return Err(TransferError::Flash("write before begin".to_string()));
        }
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.begun = false;
        let computed = crate::digest::digest_bytes(&self.written);
        if computed == self.expected_digest {
            self.finalized = true;
            Ok(())
        } else {
            self.last_error = Some("image digest check failed".to_string());
            Err(TransferError::DigestMismatch {
                expected: self.expected_digest.clone(),
                computed,
            })
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }
}
