//! Content hashing
//!
//! Two formats are produced: the canonical `sha256:<hex>` used for local
//! integrity checks and listing digests, and the Dropbox content hash used
//! to compare local files against Dropbox metadata without downloading.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Prefix for all canonical checksums produced by this module
const PREFIX: &str = "sha256:";

/// Block size of the Dropbox content hash.
pub const DROPBOX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Compute the SHA-256 checksum of string content.
///
/// Returns a string in the canonical format `"sha256:<hex>"`.
pub fn compute_content_checksum(content: &str) -> String {
    compute_bytes_checksum(content.as_bytes())
}

/// Compute the SHA-256 checksum of raw bytes in canonical format.
pub fn compute_bytes_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{}{:x}", PREFIX, hasher.finalize())
}

/// Compute the SHA-256 checksum of a file's contents in canonical format.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn compute_file_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{}{:x}", PREFIX, hasher.finalize()))
}

/// Dropbox content hash of in-memory bytes.
///
/// SHA-256 over the concatenated SHA-256 digests of each 4 MiB block,
/// rendered as lowercase hex without a prefix.
pub fn dropbox_content_hash(content: &[u8]) -> String {
    let mut overall = Sha256::new();
    for block in content.chunks(DROPBOX_BLOCK_SIZE) {
        overall.update(Sha256::digest(block));
    }
    format!("{:x}", overall.finalize())
}

/// Dropbox content hash of a file, streamed block by block.
pub fn dropbox_file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut overall = Sha256::new();
    let mut block = vec![0u8; DROPBOX_BLOCK_SIZE];

    loop {
        let filled = fill_block(&mut file, &mut block)?;
        if filled == 0 {
            break;
        }
        overall.update(Sha256::digest(&block[..filled]));
        if filled < DROPBOX_BLOCK_SIZE {
            break;
        }
    }

    Ok(format!("{:x}", overall.finalize()))
}

fn fill_block(reader: &mut impl Read, block: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < block.len() {
        let read = reader.read(&mut block[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_checksum_has_prefix() {
        let checksum = compute_content_checksum("hello world");
        assert!(checksum.starts_with("sha256:"));
    }

    #[test]
    fn content_checksum_known_value() {
        let checksum = compute_content_checksum("hello world");
        assert_eq!(
            checksum,
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn file_checksum_matches_content_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt");
        std::fs::write(&path, "hello world").unwrap();

        let file_cs = compute_file_checksum(&path).unwrap();
        let content_cs = compute_content_checksum("hello world");
        assert_eq!(file_cs, content_cs);
    }

    #[test]
    fn dropbox_hash_of_small_content_is_hash_of_single_block_digest() {
        let expected = format!("{:x}", Sha256::digest(Sha256::digest(b"hello world")));
        assert_eq!(dropbox_content_hash(b"hello world"), expected);
    }

    #[test]
    fn dropbox_hash_of_empty_content_hashes_nothing() {
        let expected = format!("{:x}", Sha256::digest(b""));
        assert_eq!(dropbox_content_hash(b""), expected);
    }

    #[test]
    fn dropbox_file_hash_matches_in_memory_hash_across_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let content: Vec<u8> = (0..DROPBOX_BLOCK_SIZE + 1234).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        assert_eq!(dropbox_file_hash(&path).unwrap(), dropbox_content_hash(&content));
    }
}
