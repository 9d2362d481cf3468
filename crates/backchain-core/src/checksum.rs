//! SHA-256 checksums for backup artifacts.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::Result;

const READ_CHUNK: usize = 64 * 1024;

/// Hex-encoded SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex-encoded SHA-256 of a file, read in chunks.
///
/// # Errors
///
/// Returns an IO error if the file cannot be opened or read.
pub async fn checksum_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; READ_CHUNK];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(buffer.get(..read).unwrap_or_default());
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_of_known_input() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_file_checksum_matches_in_memory_checksum() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("artifact.bak");
        let content: Vec<u8> = (0..200_000_u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &content).await.unwrap();

        let from_file = checksum_file(&path).await.unwrap();
        assert_eq!(from_file, sha256_hex(&content));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = tokio_test::block_on(checksum_file(Path::new("/nonexistent/backchain.bak")))
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
