//! SHA-256 helpers for record identity and snapshot integrity

use crate::error::{Result, RetailError};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the given parts concatenated without a delimiter
pub fn sha256_hex<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 of an in-memory buffer
pub fn checksum_bytes(data: &[u8]) -> String {
    sha256_hex([data])
}

/// Check a buffer against an expected digest
///
/// Comparison is case-insensitive. `subject` names the checked content in the
/// resulting error.
pub fn verify_checksum(subject: &str, data: &[u8], expected: &str) -> Result<()> {
    let actual = checksum_bytes(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(RetailError::ChecksumMismatch {
            subject: subject.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}
