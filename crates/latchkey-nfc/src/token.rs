//! Value type for one physical card's identity and attributes.

use latchkey_core::TokenUid;
use latchkey_core::constants::{
    MAX_ATS_LENGTH, MAX_TOKEN_DATA, NTAG_SIGNATURE_LENGTH,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 8-byte GET_VERSION responses for the NTAG 21x family. The sixth byte
/// encodes the storage size and is what distinguishes the variants.
const VERSION_NTAG213: [u8; 8] = [0x00, 0x04, 0x04, 0x02, 0x01, 0x00, 0x0F, 0x03];
const VERSION_NTAG215: [u8; 8] = [0x00, 0x04, 0x04, 0x02, 0x01, 0x00, 0x11, 0x03];
const VERSION_NTAG216: [u8; 8] = [0x00, 0x04, 0x04, 0x02, 0x01, 0x00, 0x13, 0x03];

/// Identity snapshot of one physical card.
///
/// Constructed empty, populated once per poll cycle that finds a tag,
/// then copied into a presence slot. All variable-length fields are
/// bounded; anything longer than its bound is truncated at the setter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Anti-collision UID. `None` means "no token".
    pub uid: Option<TokenUid>,
    /// SENS_RES bytes.
    pub atqa: u16,
    /// SEL_RES byte.
    pub sak: u8,
    /// Answer-To-Select, if the tag negotiated one.
    pub ats: Vec<u8>,
    /// GET_VERSION response, if read. Determines `max_block`.
    pub version: Vec<u8>,
    /// Highest readable block for the detected tag type (0 if unknown).
    pub max_block: u8,
    /// ECC originality signature, if read.
    pub signature: Option<[u8; NTAG_SIGNATURE_LENGTH]>,
    /// NFC one-way counter, if read.
    pub counter: Option<u32>,
    /// Raw tag memory, if read.
    pub data: Vec<u8>,
    /// How long the chip-level reads took.
    #[serde(skip)]
    pub read_time: Duration,
}

impl Token {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the empty "no token" state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set_uid(&mut self, bytes: &[u8]) {
        self.uid = TokenUid::new(bytes).ok();
    }

    pub fn set_ats(&mut self, ats: &[u8]) {
        let len = ats.len().min(MAX_ATS_LENGTH);
        self.ats = ats[..len].to_vec();
    }

    /// Store the GET_VERSION response and derive `max_block` for known
    /// NTAG 21x variants.
    pub fn set_version(&mut self, version: &[u8]) {
        let len = version.len().min(16);
        self.version = version[..len].to_vec();
        self.max_block = match self.version.as_slice() {
            v if v == VERSION_NTAG213 => 0x2C,
            v if v == VERSION_NTAG215 => 0x86,
            v if v == VERSION_NTAG216 => 0xE6,
            _ => 0,
        };
    }

    /// Store the originality signature. Anything other than exactly 32
    /// bytes is a bad read and is dropped.
    pub fn set_signature(&mut self, sig: &[u8]) {
        if sig.len() == NTAG_SIGNATURE_LENGTH {
            let mut buf = [0u8; NTAG_SIGNATURE_LENGTH];
            buf.copy_from_slice(sig);
            self.signature = Some(buf);
        }
    }

    /// Place a chunk of tag memory at `position`, growing the buffer as
    /// needed up to the data bound. Out-of-range writes are ignored.
    pub fn set_data(&mut self, position: usize, chunk: &[u8]) {
        if position >= MAX_TOKEN_DATA || position + chunk.len() > MAX_TOKEN_DATA {
            return;
        }
        if self.data.len() < position + chunk.len() {
            self.data.resize(position + chunk.len(), 0);
        }
        self.data[position..position + chunk.len()].copy_from_slice(chunk);
    }

    #[must_use]
    pub fn matches_uid(&self, bytes: &[u8]) -> bool {
        match &self.uid {
            Some(uid) => !bytes.is_empty() && uid.as_bytes() == bytes,
            None => false,
        }
    }

    /// ISO14443-4 compliance per the SAK cascade bits.
    #[must_use]
    pub fn is_iso14443_4(&self) -> bool {
        (self.sak & 0b0010_0100) == 0b0010_0000
    }

    /// NTAG 21x family detection: 7-byte UID with the family's fixed
    /// ATQA/SAK values.
    #[must_use]
    pub fn is_ntag21x(&self) -> bool {
        self.uid.as_ref().map(|u| u.len()) == Some(7) && self.atqa == 0x0044 && self.sak == 0x00
    }

    /// Hex UID for logs and the wire, empty string when no token.
    #[must_use]
    pub fn uid_hex(&self) -> String {
        self.uid.as_ref().map(|u| u.to_hex()).unwrap_or_default()
    }
}
