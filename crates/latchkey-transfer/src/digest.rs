//! Artifact digests.
//!
//! Transfers are verified end-to-end with hex-encoded SHA-256. The
//! server advertises the digest in `file_write`/`firmware_write` and
//! the device recomputes it over the staged artifact before commit.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Hex SHA-256 of an in-memory buffer.
#[must_use]
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Size and hex SHA-256 of a stored file, streamed in small blocks.
pub fn digest_file(path: &Path) -> std::io::Result<(u64, String)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut buf = [0u8; 4096];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&buf[..n]);
    }
    Ok((size, hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_digest_bytes_known_vector() {
        assert_eq!(
            digest_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            digest_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_file_matches_bytes() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let payload = vec![0x5A; 10_000];
        f.write_all(&payload).unwrap();
        f.flush().unwrap();

        let (size, digest) = digest_file(f.path()).unwrap();
        assert_eq!(size, 10_000);
        assert_eq!(digest, digest_bytes(&payload));
    }
}
