//! `FileHasher` — SHA-256 of a file path, used for drift detection.

use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct FileHasher;

impl FileHasher {
    /// Hex-encoded SHA-256 digest of the file at `path`.
    pub fn hash_file(path: impl AsRef<Path>) -> Result<String, HashError> {
        let path = path.as_ref();
        let contents = std::fs::read(path).map_err(|source| HashError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::hash_bytes(&contents))
    }

    pub fn hash_bytes(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes_is_64_hex_chars() {
        let hash = FileHasher::hash_bytes(b"hello world");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = FileHasher::hash_bytes(b"same input");
        let b = FileHasher::hash_bytes(b"same input");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"contents").unwrap();
        let hash = FileHasher::hash_file(&path).unwrap();
        assert_eq!(hash, FileHasher::hash_bytes(b"contents"));
    }
}
