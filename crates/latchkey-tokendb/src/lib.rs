//! Offline token database lookup.
//!
//! Resolves a UID against a local binary file when the control server
//! cannot answer in time. The file's first byte selects one of three
//! on-disk formats; old and new firmware must both read every format,
//! so the heterogeneity here is deliberate:
//!
//! - **v1**: `(len:u8, uid:bytes[len])*`; presence grants access.
//! - **v2**: header `(hash_bytes:u8, salt_len:u8, salt)` followed by
//!   `(hash:bytes[hash_bytes], access:u8, user_len:u8, user)*`, where
//!   `hash` is a keyed digest of `salt ++ uid` truncated to
//!   `hash_bytes`. The first matching hash wins regardless of the
//!   access value, so explicit deny records work.
//! - **v3**: `(uid_len:u8, uid, user_len:u8, user)*`; presence grants
//!   access and carries a display name.
//!
//! The database is read-only at runtime. A missing file, unknown
//! version, or truncated record all resolve to "not found".

use latchkey_core::AccessDecision;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Digest used for v2 hashed records. A parameter rather than a
/// constant because the format does not pin the algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
}

impl DigestAlgorithm {
    fn digest(&self, salt: &[u8], uid: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(salt);
                hasher.update(uid);
                hasher.finalize().to_vec()
            }
        }
    }
}

/// One resolved record. Ephemeral: constructed per lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbRecord {
    pub access_level: u8,
    pub user: String,
}

impl DbRecord {
    #[must_use]
    pub fn granted(&self) -> bool {
        self.access_level > 0
    }
}

impl From<DbRecord> for AccessDecision {
    fn from(r: DbRecord) -> Self {
        AccessDecision {
            access_level: r.access_level,
            user: r.user,
        }
    }
}

/// Byte cursor over the file contents. Every read is bounds-checked;
/// running off the end of a truncated file just ends the scan.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn read_u8(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let s = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Some(s)
    }
}

/// Handle to one token database file.
#[derive(Debug, Clone)]
pub struct TokenDb {
    path: PathBuf,
    digest: DigestAlgorithm,
}

impl TokenDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TokenDb {
            path: path.into(),
            digest: DigestAlgorithm::default(),
        }
    }

    pub fn with_digest(path: impl Into<PathBuf>, digest: DigestAlgorithm) -> Self {
        TokenDb {
            path: path.into(),
            digest,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a UID. `None` means no record was found (which callers
    /// treat as deny); `Some` may still carry `access_level == 0` for
    /// an explicit v2 deny record.
    pub fn lookup(&self, uid: &[u8]) -> Option<DbRecord> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "token database not readable");
                return None;
            }
        };

        let mut cur = Cursor::new(&bytes);
        let version = cur.read_u8()?;
        let result = match version {
            1 => self.scan_v1(&mut cur, uid),
            2 => self.scan_v2(&mut cur, uid),
            3 => self.scan_v3(&mut cur, uid),
            other => {
                warn!(version = other, "unknown token database version");
                None
            }
        };
        debug!(
            uid = %hex::encode(uid),
            version,
            found = result.is_some(),
            "token database lookup"
        );
        result
    }

    fn scan_v1(&self, cur: &mut Cursor, uid: &[u8]) -> Option<DbRecord> {
        while cur.remaining() > 0 {
            let len = cur.read_u8()? as usize;
            let rec_uid = cur.read_bytes(len)?;
            if rec_uid == uid {
                return Some(DbRecord {
                    access_level: 1,
                    user: "unknown".to_string(),
                });
            }
        }
        None
    }

    fn scan_v2(&self, cur: &mut Cursor, uid: &[u8]) -> Option<DbRecord> {
        let hash_bytes = cur.read_u8()? as usize;
        let salt_len = cur.read_u8()? as usize;
        let salt = cur.read_bytes(salt_len)?;

        let full = self.digest.digest(salt, uid);
        let needle = full.get(..hash_bytes)?;

        while cur.remaining() > 0 {
            let rec_hash = cur.read_bytes(hash_bytes)?;
            let access = cur.read_u8()?;
            let user_len = cur.read_u8()? as usize;
            let user = cur.read_bytes(user_len)?;
            if rec_hash == needle {
                // first match wins, explicit denies included
                return Some(DbRecord {
                    access_level: access,
                    user: String::from_utf8_lossy(user).into_owned(),
                });
            }
        }
        None
    }

    fn scan_v3(&self, cur: &mut Cursor, uid: &[u8]) -> Option<DbRecord> {
        while cur.remaining() > 0 {
            let uid_len = cur.read_u8()? as usize;
            let rec_uid = cur.read_bytes(uid_len)?;
            let user_len = cur.read_u8()? as usize;
            let user = cur.read_bytes(user_len)?;
            if rec_uid == uid {
                return Some(DbRecord {
                    access_level: 1,
                    user: String::from_utf8_lossy(user).into_owned(),
                });
            }
        }
        None
    }
}
