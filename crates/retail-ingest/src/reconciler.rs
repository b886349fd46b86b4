//! Last-write-wins reconciliation of snapshot and incoming records
//!
//! The union of existing and incoming rows is grouped by identity and each
//! group keeps its maximum-version row. Implemented as a single scan over an
//! `identity → output offset` map.
//!
//! Ties on `version` keep the row seen first. Existing rows are scanned
//! before incoming ones, so on a tie the persisted row stays, and within one
//! input the earlier row stays. Output is ordered by first appearance of each
//! identity, which makes the result a pure function of the two inputs.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::models::DerivedRecord;

/// Outcome counters for one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub existing_rows: usize,
    pub incoming_rows: usize,
    /// Identities not present in the existing snapshot
    pub inserted: usize,
    /// Existing identities replaced by a newer incoming version
    pub superseded: usize,
    /// Incoming rows discarded because an equal or newer version was held
    pub discarded: usize,
    pub output_rows: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub records: Vec<DerivedRecord>,
    pub stats: ReconcileStats,
}

#[instrument(skip_all, fields(existing = existing.len(), incoming = incoming.len()))]
pub fn reconcile(existing: Vec<DerivedRecord>, incoming: Vec<DerivedRecord>) -> Reconciled {
    let mut stats = ReconcileStats {
        existing_rows: existing.len(),
        incoming_rows: incoming.len(),
        ..ReconcileStats::default()
    };

    let mut records: Vec<DerivedRecord> = Vec::with_capacity(existing.len() + incoming.len());
    let mut offsets: HashMap<String, usize> = HashMap::with_capacity(records.capacity());
    // Per output slot: does it still hold the row loaded from the snapshot?
    let mut from_existing: Vec<bool> = Vec::with_capacity(records.capacity());

    for record in existing {
        // An unreconciled snapshot may itself hold several versions of an identity
        keep_latest(&mut records, &mut offsets, &mut from_existing, record, true);
    }

    for record in incoming {
        match offsets.get(&record.identity).copied() {
            None => {
                stats.inserted += 1;
                keep_latest(&mut records, &mut offsets, &mut from_existing, record, false);
            },
            Some(offset) if record.version > records[offset].version => {
                if from_existing[offset] {
                    stats.superseded += 1;
                    from_existing[offset] = false;
                } else {
                    stats.discarded += 1;
                }
                debug!(identity = %record.identity, "Superseding older version");
                records[offset] = record;
            },
            Some(_) => {
                stats.discarded += 1;
            },
        }
    }

    stats.output_rows = records.len();
    info!(
        inserted = stats.inserted,
        superseded = stats.superseded,
        discarded = stats.discarded,
        output_rows = stats.output_rows,
        "Reconciled snapshot"
    );

    Reconciled { records, stats }
}

fn keep_latest(
    records: &mut Vec<DerivedRecord>,
    offsets: &mut HashMap<String, usize>,
    from_existing: &mut Vec<bool>,
    record: DerivedRecord,
    existing: bool,
) {
    match offsets.get(&record.identity).copied() {
        Some(offset) => {
            if record.version > records[offset].version {
                records[offset] = record;
            }
        },
        None => {
            offsets.insert(record.identity.clone(), records.len());
            records.push(record);
            from_existing.push(existing);
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn record(identity: &str, hour: u32, total: i64) -> DerivedRecord {
        DerivedRecord {
            invoice_id: "1".to_string(),
            stock_code: "A".to_string(),
            description: "d".to_string(),
            quantity: 1,
            invoice_timestamp: NaiveDate::from_ymd_opt(2010, 12, 1)
                .unwrap()
                .and_hms_opt(8, 26, 0)
                .unwrap(),
            unit_price: Decimal::from(total),
            customer_id: 100,
            country: "US".to_string(),
            total_amount: Decimal::from(total),
            order_year: 2010,
            order_month: 12,
            version: at(hour),
            identity: identity.to_string(),
        }
    }

    #[test]
    fn test_empty_incoming_returns_snapshot_unchanged() {
        let snapshot = vec![record("h1", 1, 10), record("h2", 1, 20)];
        let out = reconcile(snapshot.clone(), Vec::new());

        assert_eq!(out.records, snapshot);
        assert_eq!(out.stats.inserted, 0);
        assert_eq!(out.stats.superseded, 0);
    }

    #[test]
    fn test_last_write_wins() {
        let out = reconcile(vec![record("H", 1, 10)], vec![record("H", 2, 20)]);

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].total_amount, Decimal::from(20));
        assert_eq!(out.stats.superseded, 1);
    }

    #[test]
    fn test_older_incoming_version_does_not_regress() {
        let out = reconcile(vec![record("H", 5, 50)], vec![record("H", 2, 20)]);

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].total_amount, Decimal::from(50));
        assert_eq!(out.stats.discarded, 1);
    }

    #[test]
    fn test_tie_keeps_existing_row() {
        let out = reconcile(vec![record("H", 3, 30)], vec![record("H", 3, 99)]);

        assert_eq!(out.records[0].total_amount, Decimal::from(30));
    }

    #[test]
    fn test_disjoint_identities_do_not_interfere() {
        let existing = vec![record("a", 1, 1), record("b", 1, 2)];
        let incoming = vec![record("a", 2, 10), record("c", 2, 30)];
        let out = reconcile(existing, incoming);

        let totals: Vec<(String, Decimal)> = out
            .records
            .iter()
            .map(|r| (r.identity.clone(), r.total_amount))
            .collect();
        assert_eq!(
            totals,
            vec![
                ("a".to_string(), Decimal::from(10)),
                ("b".to_string(), Decimal::from(2)),
                ("c".to_string(), Decimal::from(30)),
            ]
        );
        assert_eq!(out.stats.inserted, 1);
        assert_eq!(out.stats.superseded, 1);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let existing = vec![record("a", 1, 1), record("b", 1, 2)];
        let incoming = vec![record("a", 2, 10), record("c", 2, 30)];

        let once = reconcile(existing, incoming.clone());
        let twice = reconcile(once.records.clone(), incoming);

        assert_eq!(once.records, twice.records);
        assert_eq!(twice.stats.superseded, 0);
        assert_eq!(twice.stats.inserted, 0);
    }

    #[test]
    fn test_duplicate_identities_in_existing_collapse() {
        let out = reconcile(vec![record("H", 1, 10), record("H", 4, 40)], Vec::new());

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].total_amount, Decimal::from(40));
    }
}
