//! Stored-file transfers.
//!
//! Chunks are written into a `<name>.tmp` staging file and the real
//! file is only replaced, by rename, after the staged bytes match the
//! advertised digest and size. At most one transfer runs at a time;
//! starting a new one silently abandons the old.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::digest::digest_file;
use crate::error::{Result, TransferError};

#[derive(Debug)]
struct Session {
    filename: String,
    expected_digest: String,
    expected_size: u64,
    received_size: u64,
    handle: Option<File>,
}

/// Receives one file at a time into a data directory.
#[derive(Debug)]
pub struct FileWriter {
    dir: PathBuf,
    session: Option<Session>,
}

impl FileWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            session: None,
        }
    }

    fn target_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    fn staging_path(&self, filename: &str) -> PathBuf {
        self.dir.join(format!("{filename}.tmp"))
    }

    /// Record the expectations for a new transfer. Does not touch
    /// storage yet; an already-running transfer is aborted first.
    pub fn begin(&mut self, filename: &str, digest: &str, size: u64) -> Result<()> {
        if self.session.is_some() {
            warn!("begin: aborting existing transfer first");
            self.abort();
        }
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("bad filename: {filename:?}"),
            )));
        }
        self.session = Some(Session {
            filename: filename.to_string(),
            expected_digest: digest.to_string(),
            expected_size: size,
            received_size: 0,
            handle: None,
        });
        Ok(())
    }

    /// True when the stored file already matches the advertised digest
    /// and size, so the transfer can be skipped.
    pub fn up_to_date(&self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        match digest_file(&self.target_path(&session.filename)) {
            Ok((size, digest)) => {
                let same = size == session.expected_size && digest == session.expected_digest;
                debug!(
                    filename = %session.filename,
                    local = %digest,
                    remote = %session.expected_digest,
                    same,
                    "file offered"
                );
                same
            }
            Err(_) => false,
        }
    }

    /// Create the staging file.
    pub fn open(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or(TransferError::NotRunning)?;
        let path = self
            .dir
            .join(format!("{}.tmp", session.filename));
        let handle = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        session.handle = Some(handle);
        session.received_size = 0;
        debug!(staging = %path.display(), "staging file opened");
        Ok(())
    }

    /// Write one chunk at an explicit position. Out-of-order and
    /// resent chunks are fine; holes are the server's problem and get
    /// caught by the digest check at commit.
    pub fn add(&mut self, data: &[u8], position: u64) -> Result<()> {
        let session = self.session.as_mut().ok_or(TransferError::NotRunning)?;
        let handle = session.handle.as_mut().ok_or(TransferError::NotOpen)?;
        handle.seek(SeekFrom::Start(position))?;
        handle.write_all(data)?;
        session.received_size += data.len() as u64;
        Ok(())
    }

    /// Verify the staged bytes and promote them over the target file.
    /// On any mismatch the staging file is discarded and the previous
    /// target is left exactly as it was.
    pub fn commit(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or(TransferError::NotRunning)?;
        let Some(handle) = session.handle.take() else {
            return Err(TransferError::NotOpen);
        };
        drop(handle);

        let staging = self.dir.join(format!("{}.tmp", session.filename));
        let (size, digest) = digest_file(&staging)?;
        debug!(
            advertised = %session.expected_digest,
            computed = %digest,
            size,
            "commit check"
        );

        if size != session.expected_size {
            let expected = session.expected_size;
            self.abort();
            return Err(TransferError::SizeMismatch {
                expected,
                computed: size,
            });
        }
        if digest != session.expected_digest {
            let expected = session.expected_digest.clone();
            self.abort();
            return Err(TransferError::DigestMismatch {
                expected,
                computed: digest,
            });
        }

        let target = self.dir.join(&session.filename);
        std::fs::rename(&staging, &target)?;
        info!(filename = %session.filename, size, "file committed");
        self.session = None;
        Ok(())
    }

    /// Discard any staged state. Safe to call at any time.
    pub fn abort(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.handle.take();
            let staging = self.staging_path(&session.filename);
            if std::fs::remove_file(&staging).is_ok() {
                debug!(staging = %staging.display(), "staging file removed");
            }
        }
    }

    pub fn running(&self) -> bool {
        self.session.is_some()
    }

    pub fn received_size(&self) -> u64 {
        self.session
            .as_ref()
            .map_or(0, |session| session.received_size)
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest_bytes;
    use tempfile::TempDir;

    fn writer() -> (FileWriter, TempDir) {
        let dir = TempDir::new().unwrap();
        (FileWriter::new(dir.path()), dir)
    }

    #[test]
    fn test_chunked_write_and_commit() {
        let (mut w, dir) = writer();
        let payload = b"hello latchkey tokens".to_vec();

        w.begin("tokens.dat", &digest_bytes(&payload), payload.len() as u64)
            .unwrap();
        assert!(!w.up_to_date());
        w.open().unwrap();

        // chunks arrive out of order
        w.add(&payload[10..], 10).unwrap();
        w.add(&payload[..10], 0).unwrap();
        assert_eq!(w.received_size(), payload.len() as u64);

        w.commit().unwrap();
        assert!(!w.running());
        assert_eq!(std::fs::read(dir.path().join("tokens.dat")).unwrap(), payload);
        assert!(!dir.path().join("tokens.dat.tmp").exists());
    }

    #[test]
    fn test_mismatch_preserves_previous_file() {
        let (mut w, dir) = writer();
        let previous = b"previous contents".to_vec();
        std::fs::write(dir.path().join("config.json"), &previous).unwrap();

        let payload = b"corrupted payload".to_vec();
        w.begin("config.json", &digest_bytes(b"something else"), payload.len() as u64)
            .unwrap();
        w.open().unwrap();
        w.add(&payload, 0).unwrap();

        assert!(matches!(
            w.commit(),
            Err(TransferError::DigestMismatch { .. })
        ));
        assert!(!w.running());
        assert_eq!(
            std::fs::read(dir.path().join("config.json")).unwrap(),
            previous
        );
        assert!(!dir.path().join("config.json.tmp").exists());
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let (mut w, _dir) = writer();
        let payload = b"1234".to_vec();
        w.begin("f.bin", &digest_bytes(&payload), 99).unwrap();
        w.open().unwrap();
        w.add(&payload, 0).unwrap();
        assert!(matches!(
            w.commit(),
            Err(TransferError::SizeMismatch {
                expected: 99,
                computed: 4
            })
        ));
    }

    #[test]
    fn test_up_to_date_skips_transfer() {
        let (mut w, dir) = writer();
        let payload = b"already here".to_vec();
        std::fs::write(dir.path().join("tokens.dat"), &payload).unwrap();

        w.begin("tokens.dat", &digest_bytes(&payload), payload.len() as u64)
            .unwrap();
        assert!(w.up_to_date());
    }

    #[test]
    fn test_begin_aborts_previous_session() {
        let (mut w, dir) = writer();
        w.begin("a.bin", "00", 4).unwrap();
        w.open().unwrap();
        w.add(b"abcd", 0).unwrap();
        assert!(dir.path().join("a.bin.tmp").exists());

        w.begin("b.bin", "11", 4).unwrap();
        assert!(!dir.path().join("a.bin.tmp").exists());
        assert!(w.running());
    }

    #[test]
    fn test_abort_is_idempotent() {
        let (mut w, _dir) = writer();
        w.abort();
        w.begin("a.bin", "00", 4).unwrap();
        w.open().unwrap();
        w.abort();
        w.abort();
        assert!(!w.running());
    }

    #[test]
    fn test_add_and_commit_require_session() {
        let (mut w, _dir) = writer();
        assert!(matches!(w.add(b"x", 0), Err(TransferError::NotRunning)));
        assert!(matches!(w.commit(), Err(TransferError::NotRunning)));

        w.begin("a.bin", "00", 1).unwrap();
        // begun but not opened
        assert!(matches!(w.add(b"x", 0), Err(TransferError::NotOpen)));
        assert!(matches!(w.commit(), Err(TransferError::NotOpen)));
    }

    #[test]
    fn test_bad_filename_rejected() {
        let (mut w, _dir) = writer();
        assert!(w.begin("../escape", "00", 1).is_err());
        assert!(w.begin("", "00", 1).is_err());
    }
}
