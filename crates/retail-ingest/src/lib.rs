//! Retail Ingest Library
//!
//! Incremental merge and identity resolution for retail order lines.
//!
//! A run flows through these stages:
//!
//! - **Change detection** ([`change_detector`]): rows new or changed since the
//!   previous batch
//! - **Normalization** ([`normalizer`]): typed, de-duplicated canonical records
//! - **Derivation** ([`identity`]): content identity, totals and run version
//! - **Reconciliation** ([`reconciler`]): one current row per identity,
//!   last write wins
//! - **Snapshot write** ([`store`]): all-or-nothing replacement of the
//!   persisted snapshot
//!
//! [`pipeline::Pipeline`] drives the stages for one [`config::RunContext`].
//!
//! # Example
//!
//! ```no_run
//! use retail_ingest::config::{IngestConfig, RunContext};
//! use retail_ingest::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let ctx = RunContext::new(&config, "data/incoming/online_retail.csv");
//!     let stats = Pipeline::for_context(&ctx).run(&ctx).await?;
//!     println!("{}", serde_json::to_string_pretty(&stats)?);
//!     Ok(())
//! }
//! ```

pub mod change_detector;
pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod reconciler;
pub mod simulate;
pub mod source;
pub mod store;

pub use config::{EtlMode, IngestConfig, RunContext};
pub use error::{IngestError, Result};
pub use pipeline::{Pipeline, RunStats};
pub use store::{CsvSnapshotStore, SnapshotStore};
