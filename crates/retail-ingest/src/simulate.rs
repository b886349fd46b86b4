//! Synthetic follow-up batches for exercising incremental runs
//!
//! A simulated batch is the base batch with its first row's invoice date
//! corrected to `now` (an updated record) and one brand-new order line
//! prepended (a new record).

use chrono::NaiveDateTime;
use rand::Rng;
use std::path::Path;
use tracing::{info, instrument};

use crate::error::{IngestError, Result};
use crate::models::{columns, RawBatch, RawRow};
use crate::source::{read_batch, write_batch};

const NEW_INVOICE_NO: &str = "123456";
const NEW_DESCRIPTION: &str = "description";
const NEW_QUANTITY: &str = "1";
const NEW_INVOICE_DATE: &str = "2021-01-01 10:00:00";
const NEW_UNIT_PRICE: &str = "2.00";
const NEW_CUSTOMER_ID: &str = "77777.0";
const NEW_COUNTRY: &str = "Romania";

/// Build the simulated follow-up of `base`
///
/// Columns outside the source schema are left empty in the new row.
pub fn simulate_increment<R: Rng>(base: &RawBatch, now: NaiveDateTime, rng: &mut R) -> Result<RawBatch> {
    let date_col = base
        .column_index(columns::INVOICE_DATE)
        .ok_or_else(|| IngestError::missing_column(columns::INVOICE_DATE))?;

    let stock_code = rng.gen_range(10_000..=99_999).to_string();
    let new_row: RawRow = base
        .headers()
        .iter()
        .map(|header| {
            match header.as_str() {
                columns::INVOICE_NO => NEW_INVOICE_NO,
                columns::STOCK_CODE => stock_code.as_str(),
                columns::DESCRIPTION => NEW_DESCRIPTION,
                columns::QUANTITY => NEW_QUANTITY,
                columns::INVOICE_DATE => NEW_INVOICE_DATE,
                columns::UNIT_PRICE => NEW_UNIT_PRICE,
                columns::CUSTOMER_ID => NEW_CUSTOMER_ID,
                columns::COUNTRY => NEW_COUNTRY,
                _ => "",
            }
            .to_string()
        })
        .collect();

    let mut rows = Vec::with_capacity(base.len() + 1);
    rows.push(new_row);
    rows.extend(base.rows().iter().cloned());
    if let Some(first) = rows.get_mut(1) {
        first[date_col] = now.format("%Y-%m-%d %H:%M:%S").to_string();
    }

    RawBatch::new(base.headers().to_vec(), rows)
}

/// Read `from`, simulate a follow-up batch and write it to `output`
#[instrument(skip_all, fields(from = %from.display(), output = %output.display()))]
pub async fn simulate_file(from: &Path, output: &Path, now: NaiveDateTime) -> Result<RawBatch> {
    let base = read_batch(from).await?;
    let simulated = simulate_increment(&base, now, &mut rand::thread_rng())?;
    write_batch(output, &simulated).await?;

    info!(rows = simulated.len(), "Wrote simulated incremental batch");
    Ok(simulated)
}
