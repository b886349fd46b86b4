//! Error types shared across the retail merge crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, RetailError>;

/// Errors raised by the shared utilities
#[derive(Error, Debug)]
pub enum RetailError {
    #[error("Checksum mismatch for {subject}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        subject: String,
        expected: String,
        actual: String,
    },
}
