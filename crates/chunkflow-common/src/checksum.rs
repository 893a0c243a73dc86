//! Checksum utilities for stored payload verification

use crate::error::{ChunkflowError, Result};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verify that `data` hashes to `expected` (case-insensitive hex)
pub fn verify_sha256(data: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ChunkflowError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
