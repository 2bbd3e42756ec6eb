//! Content hashing for content-keyed deduplication.

use blake3::Hasher as Blake3Hasher;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// BLAKE3 content hashing.
pub struct Hasher;

impl Hasher {
    /// Generate a BLAKE3 hash of file contents.
    ///
    /// Streams the file in 64KB chunks.
    pub fn content_hash(path: &Path) -> std::io::Result<String> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Blake3Hasher::new();

        let mut buffer = [0u8; 65536];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize().to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streamed_hash_matches_whole_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(
            Hasher::content_hash(&path).unwrap(),
            blake3::hash(&data).to_hex().to_string()
        );
    }

    #[test]
    fn test_same_content_same_hash_regardless_of_name() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = (
            dir.path().join("a.png"),
            dir.path().join("copy.png"),
            dir.path().join("other.png"),
        );
        std::fs::write(&a, b"pixels").unwrap();
        std::fs::write(&b, b"pixels").unwrap();
        std::fs::write(&c, b"other").unwrap();

        let hash = Hasher::content_hash(&a).unwrap();
        assert_eq!(hash, Hasher::content_hash(&b).unwrap());
        assert_ne!(hash, Hasher::content_hash(&c).unwrap());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Hasher::content_hash(&dir.path().join("gone")).is_err());
    }
}
