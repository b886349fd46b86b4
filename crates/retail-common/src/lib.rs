//! Retail Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the retail merge workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`RetailError`] and the [`Result`] alias
//! - **Checksums**: SHA-256 digests for content identity and file integrity
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use retail_common::checksum::sha256_hex;
//!
//! let digest = sha256_hex(["536365", "85123A", "6", "2.55"]);
//! assert_eq!(digest.len(), 64);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, RetailError};
