//! Mock reader port for testing and development.
//!
//! Simulates the reader chip at the transport seam: tests place a target
//! in the field, script transceive responses, and flip responsiveness to
//! exercise the health/reset path without hardware.

use crate::error::{NfcError, Result};
use crate::reader::{RawTarget, ReaderPort};
use std::collections::HashMap;

/// Scripted reader port.
#[derive(Debug, Default)]
pub struct MockPort {
    /// Whether firmware-version probes answer.
    pub responding: bool,
    /// Target currently in the field, if any.
    pub target: Option<RawTarget>,
    /// Transceive script: command bytes to tag response data.
    /// Commands without an entry time out.
    pub responses: HashMap<Vec<u8>, Vec<u8>>,
    /// Commands that should fail at the transport level.
    pub broken_commands: Vec<Vec<u8>>,
    /// Whether detect itself should fail at the transport level.
    pub detect_broken: bool,
    pub reset_pulses: u32,
    pub configured: bool,
}

impl MockPort {
    #[must_use]
    pub fn new() -> Self {
        MockPort {
            responding: true,
            ..Default::default()
        }
    }

    /// Script a transceive response.
    pub fn respond(&mut self, command: &[u8], response: &[u8]) {
        self.responses.insert(command.to_vec(), response.to_vec());
    }

    /// Place a plain 4-byte-UID tag in the field.
    pub fn present_classic(&mut self, uid: &[u8]) {
        self.target = Some(RawTarget {
            atqa: 0x0004,
            sak: 0x08,
            uid: uid.to_vec(),
            ats: Vec::new(),
        });
    }

    /// Place an NTAG 21x style tag (7-byte UID) in the field.
    pub fn present_ntag(&mut self, uid: &[u8; 7]) {
        self.target = Some(RawTarget {
            atqa: 0x0044,
            sak: 0x00,
            uid: uid.to_vec(),
            ats: Vec::new(),
        });
    }

    /// Take the tag out of the field.
    pub fn remove_target(&mut self) {
        self.target = None;
    }
}

impl ReaderPort for MockPort {
    async fn reset_pulse(&mut self) -> Result<()> {
        self.reset_pulses += 1;
        Ok(())
    }

    async fn firmware_version(&mut self) -> Result<u32> {
        if self.responding {
            Ok(0x32010607)
        } else {
            Err(NfcError::Timeout)
        }
    }

    async fn configure(&mut self) -> Result<()> {
        self.configured = true;
        Ok(())
    }

    async fn detect_target(&mut self) -> Result<Option<RawTarget>> {
        if self.detect_broken {
            return Err(NfcError::Transport("detect failed".to_string()));
        }
        if !self.responding {
            return Err(NfcError::Timeout);
        }
        Ok(self.target.clone())
    }

    async fn transceive(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        if self.broken_commands.iter().any(|c| c == command) {
            return Err(NfcError::Transport(format!(
                "command {} failed",
                hex::encode(command)
            )));
        }
        match self.responses.get(command) {
            Some(resp) => Ok(resp.clone()),
            None => Err(NfcError::Timeout),
        }
    }
}
