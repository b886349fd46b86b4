//! Raw batch → canonical records
//!
//! Rules, in order:
//! 1. resolve the source columns by header name
//! 2. drop rows without a customer id, then cast it to an integer
//! 3. drop cancelled invoices
//! 4. parse the typed fields
//! 5. drop duplicates on `(invoice_id, stock_code, quantity, unit_price)`,
//!    keeping the first occurrence

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, instrument};

use crate::config::DEFAULT_CANCELLATION_PREFIX;
use crate::error::{IngestError, Result};
use crate::models::{columns, CanonicalRecord, RawBatch};

/// Accepted `InvoiceDate` layouts, tried in order before RFC 3339
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
];

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub cancellation_prefix: String,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            cancellation_prefix: DEFAULT_CANCELLATION_PREFIX.to_string(),
        }
    }
}

/// Row counters for one normalization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub input_rows: usize,
    pub missing_customer: usize,
    pub cancelled: usize,
    pub duplicates: usize,
    pub output_rows: usize,
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub records: Vec<CanonicalRecord>,
    pub stats: NormalizeStats,
}

/// Header positions of the source columns
struct ColumnMap {
    invoice_no: usize,
    stock_code: usize,
    description: usize,
    quantity: usize,
    invoice_date: usize,
    unit_price: usize,
    customer_id: usize,
    country: usize,
}

impl ColumnMap {
    fn resolve(batch: &RawBatch) -> Result<Self> {
        let find = |name: &str| {
            batch
                .column_index(name)
                .ok_or_else(|| IngestError::missing_column(name))
        };

        Ok(Self {
            invoice_no: find(columns::INVOICE_NO)?,
            stock_code: find(columns::STOCK_CODE)?,
            description: find(columns::DESCRIPTION)?,
            quantity: find(columns::QUANTITY)?,
            invoice_date: find(columns::INVOICE_DATE)?,
            unit_price: find(columns::UNIT_PRICE)?,
            customer_id: find(columns::CUSTOMER_ID)?,
            country: find(columns::COUNTRY)?,
        })
    }
}

#[instrument(skip_all, fields(rows = batch.len()))]
pub fn normalize(batch: &RawBatch, options: &NormalizeOptions) -> Result<Normalized> {
    let cols = ColumnMap::resolve(batch)?;
    let mut stats = NormalizeStats {
        input_rows: batch.len(),
        ..NormalizeStats::default()
    };
    let mut seen: HashSet<(String, String, i64, Decimal)> = HashSet::new();
    let mut records = Vec::with_capacity(batch.len());

    for (idx, row) in batch.rows().iter().enumerate() {
        let line = batch.row_number(idx);
        let cell = |i: usize| row[i].trim();

        let raw_customer = cell(cols.customer_id);
        if raw_customer.is_empty() {
            stats.missing_customer += 1;
            continue;
        }
        let customer_id = parse_customer_id(raw_customer).ok_or_else(|| {
            IngestError::mistyped(line, columns::CUSTOMER_ID, raw_customer, "an integer")
        })?;

        let invoice_id = cell(cols.invoice_no);
        if invoice_id.starts_with(options.cancellation_prefix.as_str()) {
            stats.cancelled += 1;
            continue;
        }

        let raw_quantity = cell(cols.quantity);
        let quantity: i64 = raw_quantity.parse().map_err(|_| {
            IngestError::mistyped(line, columns::QUANTITY, raw_quantity, "an integer")
        })?;

        let raw_price = cell(cols.unit_price);
        let unit_price = parse_decimal(raw_price).ok_or_else(|| {
            IngestError::mistyped(line, columns::UNIT_PRICE, raw_price, "a decimal")
        })?;

        let raw_date = cell(cols.invoice_date);
        let invoice_timestamp = parse_timestamp(raw_date).ok_or_else(|| {
            IngestError::mistyped(line, columns::INVOICE_DATE, raw_date, "a date/time")
        })?;

        let stock_code = cell(cols.stock_code);
        let key = (
            invoice_id.to_string(),
            stock_code.to_string(),
            quantity,
            unit_price.normalize(),
        );
        if !seen.insert(key) {
            stats.duplicates += 1;
            debug!(line, invoice_id, stock_code, "Dropping duplicate order line");
            continue;
        }

        records.push(CanonicalRecord {
            invoice_id: invoice_id.to_string(),
            stock_code: stock_code.to_string(),
            description: cell(cols.description).to_string(),
            quantity,
            invoice_timestamp,
            unit_price,
            customer_id,
            country: cell(cols.country).to_string(),
        });
    }

    stats.output_rows = records.len();
    info!(
        input_rows = stats.input_rows,
        missing_customer = stats.missing_customer,
        cancelled = stats.cancelled,
        duplicates = stats.duplicates,
        output_rows = stats.output_rows,
        "Normalized raw batch"
    );

    Ok(Normalized { records, stats })
}

/// Accepts `17850` and float renderings such as `17850.0`, truncating toward zero
fn parse_customer_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>()
        .ok()
        .or_else(|| parse_decimal(raw).and_then(|d| d.trunc().to_i64()))
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    raw.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(raw).ok())
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const HEADERS: [&str; 8] = [
        "InvoiceNo",
        "StockCode",
        "Description",
        "Quantity",
        "InvoiceDate",
        "UnitPrice",
        "CustomerID",
        "Country",
    ];

    fn dec(raw: &str) -> Decimal {
        raw.parse().unwrap()
    }

    fn batch(rows: &[[&str; 8]]) -> RawBatch {
        RawBatch::new(
            HEADERS.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
        .unwrap()
    }

    fn run(rows: &[[&str; 8]]) -> Result<Normalized> {
        normalize(&batch(rows), &NormalizeOptions::default())
    }

    #[test]
    fn test_typed_fields() {
        let out = run(&[[
            "536365",
            "85123A",
            "WHITE HANGING HEART T-LIGHT HOLDER",
            "6",
            "2010-12-01 08:26:00",
            "2.55",
            "17850.0",
            "United Kingdom",
        ]])
        .unwrap();

        assert_eq!(out.records.len(), 1);
        let r = &out.records[0];
        assert_eq!(r.invoice_id, "536365");
        assert_eq!(r.quantity, 6);
        assert_eq!(r.unit_price, dec("2.55"));
        assert_eq!(r.customer_id, 17850);
        assert_eq!(
            r.invoice_timestamp,
            NaiveDate::from_ymd_opt(2010, 12, 1)
                .unwrap()
                .and_hms_opt(8, 26, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_rows_without_customer_are_dropped() {
        let out = run(&[
            ["1", "A", "d", "1", "2010-12-01 08:26:00", "1.0", "", "UK"],
            ["2", "B", "d", "1", "2010-12-01 08:26:00", "1.0", "100", "UK"],
        ])
        .unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.stats.missing_customer, 1);
        assert_eq!(out.records[0].invoice_id, "2");
    }

    #[test]
    fn test_cancelled_invoices_are_dropped() {
        let out = run(&[
            ["C536379", "D", "Discount", "-1", "2010-12-01 09:41:00", "27.50", "14527", "UK"],
            ["536380", "22961", "JAM", "24", "2010-12-01 09:41:00", "0.85", "17809", "UK"],
        ])
        .unwrap();

        assert_eq!(out.stats.cancelled, 1);
        assert!(out.records.iter().all(|r| !r.invoice_id.starts_with('C')));
    }

    #[test]
    fn test_duplicates_collapse_even_if_description_differs() {
        let out = run(&[
            ["1", "A", "first", "2", "2010-12-01 08:26:00", "5.0", "100", "US"],
            ["1", "A", "second", "2", "2010-12-02 08:26:00", "5.00", "100", "US"],
        ])
        .unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.stats.duplicates, 1);
        assert_eq!(out.records[0].description, "first");
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let batch = RawBatch::new(
            vec!["InvoiceNo".into(), "StockCode".into()],
            vec![vec!["1".into(), "A".into()]],
        )
        .unwrap();

        let err = normalize(&batch, &NormalizeOptions::default()).unwrap_err();
        assert!(matches!(err, IngestError::Schema(_)));
        assert!(err.to_string().contains("Description"));
    }

    #[test]
    fn test_mistyped_quantity_is_schema_error() {
        let err = run(&[["1", "A", "d", "two", "2010-12-01 08:26:00", "1.0", "100", "UK"]])
            .unwrap_err();
        assert!(matches!(err, IngestError::Schema(_)));
        assert!(err.to_string().contains("Quantity"));
    }

    #[test]
    fn test_mistyped_row_reports_input_row_after_diff() {
        let good: Vec<[String; 8]> = (0..10)
            .map(|i| {
                [
                    format!("5000{}", i),
                    "A".to_string(),
                    "d".to_string(),
                    "1".to_string(),
                    "2010-12-01 08:26:00".to_string(),
                    "1.0".to_string(),
                    "100".to_string(),
                    "UK".to_string(),
                ]
            })
            .collect();
        let mut rows: Vec<[&str; 8]> = good.iter().map(|r| r.each_ref().map(String::as_str)).collect();
        let previous = batch(&rows);
        rows.push(["60000", "B", "d", "two", "2010-12-01 08:26:00", "1.0", "100", "UK"]);

        let changed = crate::change_detector::detect_changes(
            batch(&rows),
            Some(&previous),
            crate::config::EtlMode::Incremental,
        )
        .unwrap();
        assert_eq!(changed.len(), 1);

        let err = normalize(&changed, &NormalizeOptions::default()).unwrap_err();
        assert!(matches!(err, IngestError::Schema(_)));
        assert!(err.to_string().contains("row 11:"), "{}", err);
    }

    #[test]
    fn test_custom_cancellation_prefix() {
        let options = NormalizeOptions {
            cancellation_prefix: "X".to_string(),
        };
        let out = normalize(
            &batch(&[
                ["X1", "A", "d", "1", "2010-12-01 08:26:00", "1.0", "100", "UK"],
                ["C1", "A", "d", "1", "2010-12-01 08:26:00", "1.0", "100", "UK"],
            ]),
            &options,
        )
        .unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].invoice_id, "C1");
    }

    #[test]
    fn test_timestamp_formats() {
        for raw in [
            "2010-12-01 08:26:00",
            "2010-12-01T08:26:00",
            "2010-12-01 08:26",
            "12/01/2010 08:26",
            "2010-12-01T08:26:00Z",
        ] {
            assert!(parse_timestamp(raw).is_some(), "failed to parse {}", raw);
        }
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_customer_id_parsing() {
        assert_eq!(parse_customer_id("17850"), Some(17850));
        assert_eq!(parse_customer_id("17850.0"), Some(17850));
        assert_eq!(parse_customer_id("abc"), None);
    }
}
