//! TLS peer pinning.
//!
//! The server is identified by the SHA-256 digest of its certificate,
//! not by chain validation. Two pins are accepted so the server's
//! certificate can be rotated without a window where the device locks
//! itself out: deploy the new digest as the secondary pin first, swap
//! the certificate, then retire the old pin.

use subtle::ConstantTimeEq;

use crate::error::{NetError, Result};

/// Length of a certificate digest in bytes.
pub const FINGERPRINT_LENGTH: usize = 32;

/// One or two acceptable peer certificate digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintPin {
    primary: [u8; FINGERPRINT_LENGTH],
    secondary: Option<[u8; FINGERPRINT_LENGTH]>,
}

impl FingerprintPin {
    pub fn new(primary: [u8; FINGERPRINT_LENGTH]) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: [u8; FINGERPRINT_LENGTH]) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Parse pins from hex strings, `aa:bb:...` colon form included.
    /// An empty secondary string means no secondary pin.
    pub fn from_hex(primary: &str, secondary: &str) -> Result<Self> {
        let primary = parse_hex(primary)?;
        let pin = Self::new(primary);
        if secondary.is_empty() {
            Ok(pin)
        } else {
            Ok(pin.with_secondary(parse_hex(secondary)?))
        }
    }

    /// Check a peer digest against the pin set in constant time. Both
    /// pins are always compared so a miss on the first does not show
    /// up as a timing difference.
    #[must_use]
    pub fn matches(&self, digest: &[u8]) -> bool {
        if digest.len() != FINGERPRINT_LENGTH {
            return false;
        }
        let primary_ok = self.primary.ct_eq(digest);
        let secondary_ok = self
            .secondary
            .unwrap_or([0u8; FINGERPRINT_LENGTH])
            .ct_eq(digest);
        let has_secondary = u8::from(self.secondary.is_some());
        bool::from(primary_ok | (secondary_ok & has_secondary.ct_eq(&1)))
    }
}

fn parse_hex(s: &str) -> Result<[u8; FINGERPRINT_LENGTH]> {
    let cleaned: String = s.chars().filter(|c| *c != ':').collect();
    let bytes = hex::decode(&cleaned)
        .map_err(|e| NetError::InvalidFingerprint(format!("{s}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| NetError::InvalidFingerprint(format!("{s}: wrong length")))
}
