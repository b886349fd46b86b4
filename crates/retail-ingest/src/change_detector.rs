//! Row-level change detection between consecutive raw batches

use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::config::EtlMode;
use crate::error::Result;
use crate::models::{RawBatch, RawRow};

/// Select the raw rows that need to flow through the pipeline
///
/// In incremental mode with a previous batch this is the multiset difference
/// `new - previous` under exact cell-by-cell equality, so a row whose
/// non-identity fields were corrected still comes through. Otherwise the new
/// batch is returned untouched.
#[instrument(skip_all, fields(mode = %mode, new_rows = new.len()))]
pub fn detect_changes(new: RawBatch, previous: Option<&RawBatch>, mode: EtlMode) -> Result<RawBatch> {
    let previous = match (mode, previous) {
        (EtlMode::Refresh, _) => {
            debug!("Refresh mode, passing full batch through");
            return Ok(new);
        },
        (EtlMode::Incremental, None) => {
            info!("No previous batch available, processing full batch");
            return Ok(new);
        },
        (EtlMode::Incremental, Some(previous)) => previous.project(new.headers())?,
    };

    let mut remaining: HashMap<&RawRow, usize> = HashMap::with_capacity(previous.len());
    for row in previous.rows() {
        *remaining.entry(row).or_default() += 1;
    }

    let changed = new.retain_rows(|row| match remaining.get_mut(row) {
        Some(count) if *count > 0 => {
            *count -= 1;
            false
        },
        _ => true,
    });

    info!(
        previous_rows = previous.len(),
        changed_rows = changed.len(),
        "Computed new/changed rows against previous batch"
    );

    Ok(changed)
}
