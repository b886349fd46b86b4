//! Ingestion configuration and the per-run context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{IngestError, Result};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default directory holding archived raw batches.
pub const DEFAULT_BATCH_DIR: &str = "data/base";

/// Default snapshot location.
pub const DEFAULT_SNAPSHOT_DIR: &str = "data/transformed";

/// Invoice numbers starting with this prefix are cancellations.
pub const DEFAULT_CANCELLATION_PREFIX: &str = "C";

/// Default maximum rows per snapshot part file.
pub const DEFAULT_ROWS_PER_PART: usize = 100_000;

/// How the change detector treats the incoming batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EtlMode {
    /// Only rows new or changed since the previous batch
    #[default]
    Incremental,
    /// The full batch, ignoring any previous batch
    Refresh,
}

impl std::str::FromStr for EtlMode {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "incremental" => Ok(EtlMode::Incremental),
            "refresh" => Ok(EtlMode::Refresh),
            _ => Err(IngestError::config(format!(
                "Invalid ETL mode '{}'. Must be 'incremental' or 'refresh'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for EtlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EtlMode::Incremental => write!(f, "incremental"),
            EtlMode::Refresh => write!(f, "refresh"),
        }
    }
}

/// Job-level configuration, loaded from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub mode: EtlMode,
    /// Archive of previously consumed raw batches
    pub batch_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub cancellation_prefix: String,
    pub rows_per_part: usize,
}

impl IngestConfig {
    /// Load configuration from a `.env` file (if present) and the environment
    ///
    /// Environment variables:
    /// - `RETAIL_ETL_MODE`: incremental | refresh
    /// - `RETAIL_BATCH_DIR`
    /// - `RETAIL_SNAPSHOT_DIR`
    /// - `RETAIL_CANCELLATION_PREFIX`
    /// - `RETAIL_ROWS_PER_PART`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            mode: match std::env::var("RETAIL_ETL_MODE") {
                Ok(mode) => mode.parse()?,
                Err(_) => EtlMode::default(),
            },
            batch_dir: std::env::var("RETAIL_BATCH_DIR")
                .unwrap_or_else(|_| DEFAULT_BATCH_DIR.to_string())
                .into(),
            snapshot_dir: std::env::var("RETAIL_SNAPSHOT_DIR")
                .unwrap_or_else(|_| DEFAULT_SNAPSHOT_DIR.to_string())
                .into(),
            cancellation_prefix: std::env::var("RETAIL_CANCELLATION_PREFIX")
                .unwrap_or_else(|_| DEFAULT_CANCELLATION_PREFIX.to_string()),
            rows_per_part: match std::env::var("RETAIL_ROWS_PER_PART") {
                Ok(raw) => raw.parse().map_err(|_| {
                    IngestError::config(format!("RETAIL_ROWS_PER_PART must be an integer, got '{}'", raw))
                })?,
                Err(_) => DEFAULT_ROWS_PER_PART,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_dir.as_os_str().is_empty() {
            return Err(IngestError::config("RETAIL_BATCH_DIR cannot be empty"));
        }
        if self.snapshot_dir.as_os_str().is_empty() {
            return Err(IngestError::config("RETAIL_SNAPSHOT_DIR cannot be empty"));
        }
        if self.cancellation_prefix.is_empty() {
            return Err(IngestError::config("RETAIL_CANCELLATION_PREFIX cannot be empty"));
        }
        if self.rows_per_part == 0 {
            return Err(IngestError::config("RETAIL_ROWS_PER_PART must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: EtlMode::default(),
            batch_dir: PathBuf::from(DEFAULT_BATCH_DIR),
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            cancellation_prefix: DEFAULT_CANCELLATION_PREFIX.to_string(),
            rows_per_part: DEFAULT_ROWS_PER_PART,
        }
    }
}

/// Everything a single run needs, passed explicitly instead of discovered
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub mode: EtlMode,
    /// The newly acquired raw batch
    pub input: PathBuf,
    /// The raw batch consumed by the last successful run, if any
    pub previous_batch: Option<PathBuf>,
    pub snapshot_dir: PathBuf,
    /// Shared by every record derived in this run
    pub run_version: DateTime<Utc>,
    pub cancellation_prefix: String,
    pub rows_per_part: usize,
}

impl RunContext {
    /// A context stamped with the current wall-clock time as run version
    pub fn new(config: &IngestConfig, input: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode: config.mode,
            input: input.into(),
            previous_batch: None,
            snapshot_dir: config.snapshot_dir.clone(),
            run_version: Utc::now(),
            cancellation_prefix: config.cancellation_prefix.clone(),
            rows_per_part: config.rows_per_part,
        }
    }

    pub fn with_previous_batch(mut self, previous: Option<PathBuf>) -> Self {
        self.previous_batch = previous;
        self
    }

    pub fn with_run_version(mut self, run_version: DateTime<Utc>) -> Self {
        self.run_version = run_version;
        self
    }
}
