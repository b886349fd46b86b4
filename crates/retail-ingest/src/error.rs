//! Error types for the merge pipeline
//!
//! Every variant is fatal to a run. Nothing is retried and nothing is
//! persisted once an error has been raised.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// A required raw field is missing or mistyped, or two batches disagree on columns
    #[error("Schema error: {0}")]
    Schema(String),

    /// The existing snapshot could not be read or failed verification
    #[error("Failed to read snapshot at '{path}': {reason}")]
    StoreRead { path: PathBuf, reason: String },

    /// Staging or swapping a new snapshot failed; the prior snapshot is intact
    #[error("Failed to write snapshot at '{path}': {reason}")]
    StoreWrite { path: PathBuf, reason: String },

    /// A raw batch file could not be read or archived
    #[error("Failed to access batch '{path}': {reason}")]
    Source { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn missing_column(column: &str) -> Self {
        Self::Schema(format!("required column '{}' is missing", column))
    }

    /// `row` is the 1-based data row, header excluded
    pub fn mistyped(row: usize, column: &str, value: &str, expected: &str) -> Self {
        Self::Schema(format!(
            "row {}: column '{}' has value '{}', expected {}",
            row, column, value, expected
        ))
    }

    pub fn store_read(path: impl AsRef<Path>, reason: impl Display) -> Self {
        Self::StoreRead {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn store_write(path: impl AsRef<Path>, reason: impl Display) -> Self {
        Self::StoreWrite {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn source(path: impl AsRef<Path>, reason: impl Display) -> Self {
        Self::Source {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short machine-friendly label, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Schema(_) => "schema",
            IngestError::StoreRead { .. } => "store_read",
            IngestError::StoreWrite { .. } => "store_write",
            IngestError::Source { .. } => "source",
            IngestError::Config(_) => "config",
        }
    }
}
