//! Content identity, derived amounts and run versioning
//!
//! The identity covers only the immutable key of an order line. Fields such
//! as the invoice date or description may be corrected between batches; a
//! corrected line keeps its identity and becomes a newer version of the same
//! row rather than a duplicate.

use chrono::{DateTime, Datelike, Utc};
use retail_common::checksum::sha256_hex;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, instrument};

use crate::error::{IngestError, Result};
use crate::models::{CanonicalRecord, DerivedRecord};

/// Decimal places kept in `total_amount`
const AMOUNT_SCALE: u32 = 2;

/// Text form of a price inside the identity hash
///
/// Normalized so that numerically equal prices hash alike, with at least one
/// fractional digit: `5` and `5.00` both render as `5.0`.
pub fn price_text(price: &Decimal) -> String {
    let normalized = price.normalize();
    if normalized.scale() == 0 {
        format!("{}.0", normalized)
    } else {
        normalized.to_string()
    }
}

/// SHA-256 over `invoice_id`, `stock_code`, `quantity`, `unit_price` as text, no delimiter
pub fn identity_of(invoice_id: &str, stock_code: &str, quantity: i64, unit_price: &Decimal) -> String {
    sha256_hex([
        invoice_id,
        stock_code,
        quantity.to_string().as_str(),
        price_text(unit_price).as_str(),
    ])
}

/// `quantity * unit_price`, rounded half away from zero to two places
pub fn total_amount(quantity: i64, unit_price: &Decimal) -> Option<Decimal> {
    Decimal::from(quantity)
        .checked_mul(*unit_price)
        .map(|total| total.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

/// Enrich canonical records and stamp them with the run version
#[instrument(skip_all, fields(records = records.len(), run_version = %run_version))]
pub fn derive(records: Vec<CanonicalRecord>, run_version: DateTime<Utc>) -> Result<Vec<DerivedRecord>> {
    let derived = records
        .into_iter()
        .map(|r| {
            let total_amount = total_amount(r.quantity, &r.unit_price).ok_or_else(|| {
                IngestError::schema(format!(
                    "invoice {} stock {}: total amount {} x {} overflows",
                    r.invoice_id, r.stock_code, r.quantity, r.unit_price
                ))
            })?;

            Ok(DerivedRecord {
                identity: identity_of(&r.invoice_id, &r.stock_code, r.quantity, &r.unit_price),
                total_amount,
                order_year: r.invoice_timestamp.year(),
                order_month: r.invoice_timestamp.month(),
                version: run_version,
                invoice_id: r.invoice_id,
                stock_code: r.stock_code,
                description: r.description,
                quantity: r.quantity,
                invoice_timestamp: r.invoice_timestamp,
                unit_price: r.unit_price,
                customer_id: r.customer_id,
                country: r.country,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(derived = derived.len(), "Derived identities and totals");
    Ok(derived)
}
