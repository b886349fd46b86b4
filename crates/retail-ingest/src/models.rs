//! Record types flowing through the pipeline
//!
//! Raw → Canonical → Derived. Raw batches are untyped string grids; everything
//! after the normalizer is strongly typed.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// Source column names of a raw order-line batch
pub mod columns {
    pub const INVOICE_NO: &str = "InvoiceNo";
    pub const STOCK_CODE: &str = "StockCode";
    pub const DESCRIPTION: &str = "Description";
    pub const QUANTITY: &str = "Quantity";
    pub const INVOICE_DATE: &str = "InvoiceDate";
    pub const UNIT_PRICE: &str = "UnitPrice";
    pub const CUSTOMER_ID: &str = "CustomerID";
    pub const COUNTRY: &str = "Country";
}

/// One untyped row, cells in the owning batch's header order
pub type RawRow = Vec<String>;

/// A header-driven grid of untyped cells
///
/// Empty cells stand for null. Every row has exactly one cell per header.
/// Each row remembers its 1-based data-row number in the source it was read
/// from, so a filtered batch still reports errors against the input file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBatch {
    headers: Vec<String>,
    rows: Vec<RawRow>,
    origins: Vec<usize>,
}

impl RawBatch {
    pub fn new(headers: Vec<String>, rows: Vec<RawRow>) -> Result<Self> {
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != headers.len()) {
            return Err(IngestError::schema(format!(
                "row {} has {} fields but the header has {}",
                idx + 1,
                row.len(),
                headers.len()
            )));
        }
        let origins = (1..=rows.len()).collect();
        Ok(Self {
            headers,
            rows,
            origins,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Data-row number (1-based, header excluded) of `rows()[idx]` in the source
    pub fn row_number(&self, idx: usize) -> usize {
        self.origins.get(idx).copied().unwrap_or(idx + 1)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Reorder columns to match `headers`
    ///
    /// Fails when the two header sets differ.
    pub fn project(&self, headers: &[String]) -> Result<RawBatch> {
        let mut mine: Vec<&String> = self.headers.iter().collect();
        let mut theirs: Vec<&String> = headers.iter().collect();
        mine.sort();
        theirs.sort();
        if mine != theirs {
            return Err(IngestError::schema(format!(
                "batch columns {:?} do not match {:?}",
                self.headers, headers
            )));
        }

        let order: Vec<usize> = headers
            .iter()
            .filter_map(|h| self.column_index(h))
            .collect();

        let rows = self
            .rows
            .iter()
            .map(|row| order.iter().map(|&i| row[i].clone()).collect())
            .collect();

        Ok(RawBatch {
            headers: headers.to_vec(),
            rows,
            origins: self.origins.clone(),
        })
    }

    /// Keep the rows for which `keep` returns true, with their row numbers
    pub(crate) fn retain_rows(mut self, mut keep: impl FnMut(&RawRow) -> bool) -> Self {
        let (rows, origins) = self
            .rows
            .into_iter()
            .zip(self.origins)
            .filter(|(row, _)| keep(row))
            .unzip();
        self.rows = rows;
        self.origins = origins;
        self
    }
}

/// A cleaned, typed order line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRecord {
    pub invoice_id: String,
    pub stock_code: String,
    pub description: String,
    pub quantity: i64,
    pub invoice_timestamp: NaiveDateTime,
    pub unit_price: Decimal,
    pub customer_id: i64,
    pub country: String,
}

/// A canonical record enriched with identity, totals and run version
///
/// Field order is the persisted column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedRecord {
    pub invoice_id: String,
    pub stock_code: String,
    pub description: String,
    pub quantity: i64,
    pub invoice_timestamp: NaiveDateTime,
    pub unit_price: Decimal,
    pub customer_id: i64,
    pub country: String,
    pub total_amount: Decimal,
    pub order_year: i32,
    pub order_month: u32,
    pub version: DateTime<Utc>,
    pub identity: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(headers: &[&str], rows: &[&[&str]]) -> RawBatch {
        RawBatch::new(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = RawBatch::new(
            vec!["a".into(), "b".into()],
            vec![vec!["1".into(), "2".into()], vec!["3".into()]],
        );
        assert!(matches!(result, Err(IngestError::Schema(_))));
    }

    #[test]
    fn test_project_reorders_columns() {
        let b = batch(&["a", "b", "c"], &[&["1", "2", "3"]]);
        let target = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        let projected = b.project(&target).unwrap();

        assert_eq!(projected.headers(), target.as_slice());
        assert_eq!(projected.rows()[0], vec!["3", "1", "2"]);
        assert_eq!(projected.row_number(0), 1);
    }

    #[test]
    fn test_project_rejects_different_columns() {
        let b = batch(&["a", "b"], &[]);
        let target = vec!["a".to_string(), "z".to_string()];
        assert!(b.project(&target).is_err());
    }

    #[test]
    fn test_retained_rows_keep_source_row_numbers() {
        let b = batch(&["id"], &[&["A"], &["B"], &["C"], &["D"]]);
        let kept = b.retain_rows(|row| row[0] == "B" || row[0] == "D");

        assert_eq!(kept.len(), 2);
        assert_eq!(kept.row_number(0), 2);
        assert_eq!(kept.row_number(1), 4);
    }
}
