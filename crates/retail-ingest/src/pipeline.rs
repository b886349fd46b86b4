//! Extract → transform → load orchestration for one run

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::change_detector::detect_changes;
use crate::config::{EtlMode, RunContext};
use crate::error::Result;
use crate::identity::derive;
use crate::models::DerivedRecord;
use crate::normalizer::{normalize, NormalizeOptions, NormalizeStats};
use crate::reconciler::{reconcile, ReconcileStats};
use crate::source::read_batch;
use crate::store::{CsvSnapshotStore, SnapshotStore};

/// Summary of a run, printed as JSON by the binary
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub mode: EtlMode,
    /// Version stamped on every record derived in this run
    pub run_version: DateTime<Utc>,
    pub raw_rows: usize,
    pub previous_rows: Option<usize>,
    pub changed_rows: usize,
    pub normalize: NormalizeStats,
    /// `None` when the run was skipped
    pub reconcile: Option<ReconcileStats>,
    pub written_rows: Option<usize>,
    pub generation: Option<String>,
    pub skipped: bool,
    pub elapsed_ms: u64,
}

pub struct Pipeline<S> {
    store: S,
    skip_empty: bool,
}

impl Pipeline<CsvSnapshotStore> {
    /// Pipeline writing to the CSV snapshot store named by the context
    pub fn for_context(ctx: &RunContext) -> Self {
        Self::new(CsvSnapshotStore::new(&ctx.snapshot_dir).with_rows_per_part(ctx.rows_per_part))
    }
}

impl<S: SnapshotStore> Pipeline<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            skip_empty: false,
        }
    }

    /// Leave the snapshot untouched when change detection finds nothing
    pub fn with_skip_empty(mut self, skip_empty: bool) -> Self {
        self.skip_empty = skip_empty;
        self
    }

    #[instrument(skip_all, fields(run_id = %ctx.run_id, mode = %ctx.mode))]
    pub async fn run(&self, ctx: &RunContext) -> Result<RunStats> {
        let started = Instant::now();

        // EXTRACT
        let raw = read_batch(&ctx.input).await?;
        let raw_rows = raw.len();
        let previous = match (ctx.mode, &ctx.previous_batch) {
            (EtlMode::Incremental, Some(path)) => Some(read_batch(path).await?),
            _ => None,
        };
        let previous_rows = previous.as_ref().map(|p| p.len());
        let changed = detect_changes(raw, previous.as_ref(), ctx.mode)?;
        info!(
            phase = "extract",
            input = %ctx.input.display(),
            raw_rows,
            previous_rows,
            changed_rows = changed.len(),
            "Extract complete"
        );

        let mut stats = RunStats {
            run_id: ctx.run_id,
            mode: ctx.mode,
            run_version: ctx.run_version,
            raw_rows,
            previous_rows,
            changed_rows: changed.len(),
            normalize: NormalizeStats::default(),
            reconcile: None,
            written_rows: None,
            generation: None,
            skipped: false,
            elapsed_ms: 0,
        };

        if changed.is_empty() && self.skip_empty {
            info!("No new or changed rows, leaving snapshot untouched");
            stats.skipped = true;
            stats.elapsed_ms = elapsed_ms(started);
            return Ok(stats);
        }

        // TRANSFORM
        let options = NormalizeOptions {
            cancellation_prefix: ctx.cancellation_prefix.clone(),
        };
        let normalized = normalize(&changed, &options)?;
        stats.normalize = normalized.stats;

        let existing = self.store.load().await?;
        let run_version = monotonic_version(ctx.run_version, &existing);
        stats.run_version = run_version;

        let incoming = derive(normalized.records, run_version)?;
        info!(
            phase = "transform",
            canonical_rows = incoming.len(),
            missing_customer = stats.normalize.missing_customer,
            cancelled = stats.normalize.cancelled,
            duplicates = stats.normalize.duplicates,
            "Transform complete"
        );

        // LOAD
        let reconciled = reconcile(existing, incoming);
        let receipt = self.store.replace(&reconciled.records).await?;
        info!(
            phase = "load",
            location = %self.store.location().display(),
            generation = %receipt.generation,
            written_rows = receipt.row_count,
            "Load complete"
        );

        stats.reconcile = Some(reconciled.stats);
        stats.written_rows = Some(receipt.row_count);
        stats.generation = Some(receipt.generation);
        stats.elapsed_ms = elapsed_ms(started);
        Ok(stats)
    }
}

/// Keep run versions strictly increasing even if the clock went backwards
fn monotonic_version(proposed: DateTime<Utc>, existing: &[DerivedRecord]) -> DateTime<Utc> {
    match existing.iter().map(|r| r.version).max() {
        Some(max) if proposed <= max => {
            let bumped = max + Duration::milliseconds(1);
            warn!(
                proposed = %proposed,
                snapshot_max = %max,
                bumped = %bumped,
                "Run version not after snapshot version, bumping"
            );
            bumped
        },
        _ => proposed,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
