//! Persisted snapshot store
//!
//! Layout of a snapshot location:
//!
//! ```text
//! <root>/
//!   CURRENT                  name of the live generation
//!   gen-<stamp>-<uuid>/
//!     part-00000.csv         derived records, with header
//!     _MANIFEST.json         row count and per-part SHA-256
//! ```
//!
//! A write stages a complete new generation and then atomically renames a
//! fresh pointer file over `CURRENT`. Readers therefore see either the old
//! generation or the new one, never a mix. Generations not named by
//! `CURRENT` are garbage and are removed after the next successful swap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use retail_common::checksum::{checksum_bytes, verify_checksum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::DEFAULT_ROWS_PER_PART;
use crate::error::{IngestError, Result};
use crate::models::DerivedRecord;

pub const CURRENT_FILE: &str = "CURRENT";
pub const MANIFEST_FILE: &str = "_MANIFEST.json";
const GENERATION_PREFIX: &str = "gen-";
const PART_PREFIX: &str = "part-";

/// Persisted column order of [`DerivedRecord`]
pub const SNAPSHOT_COLUMNS: [&str; 13] = [
    "invoice_id",
    "stock_code",
    "description",
    "quantity",
    "invoice_timestamp",
    "unit_price",
    "customer_id",
    "country",
    "total_amount",
    "order_year",
    "order_month",
    "version",
    "identity",
];

/// Table store holding the current reconciled snapshot
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Full scan of the current snapshot; an absent snapshot is empty
    async fn load(&self) -> Result<Vec<DerivedRecord>>;

    /// Replace the snapshot wholesale, all or nothing
    async fn replace(&self, records: &[DerivedRecord]) -> Result<SnapshotReceipt>;

    /// Human-readable location, for logs
    fn location(&self) -> &Path;
}

/// Proof of a committed write
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReceipt {
    pub location: PathBuf,
    pub generation: String,
    pub row_count: usize,
    pub parts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    written_at: DateTime<Utc>,
    row_count: usize,
    parts: Vec<PartEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PartEntry {
    file: String,
    rows: usize,
    sha256: String,
}

/// Directory-backed store writing CSV part files
#[derive(Debug, Clone)]
pub struct CsvSnapshotStore {
    root: PathBuf,
    rows_per_part: usize,
}

impl CsvSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            rows_per_part: DEFAULT_ROWS_PER_PART,
        }
    }

    pub fn with_rows_per_part(mut self, rows_per_part: usize) -> Self {
        self.rows_per_part = rows_per_part.max(1);
        self
    }

    /// Name of the live generation, `None` when nothing was ever committed
    pub async fn current_generation(&self) -> Result<Option<String>> {
        let pointer = self.root.join(CURRENT_FILE);
        let name = match tokio::fs::read_to_string(&pointer).await {
            Ok(name) => name.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IngestError::store_read(&pointer, e)),
        };

        if !name.starts_with(GENERATION_PREFIX) || name.contains(['/', '\\']) || name.contains("..") {
            return Err(IngestError::store_read(
                &pointer,
                format!("invalid generation name '{}'", name),
            ));
        }
        Ok(Some(name))
    }

    async fn read_generation(&self, generation: &str) -> Result<Vec<DerivedRecord>> {
        let dir = self.root.join(generation);
        let manifest_path = dir.join(MANIFEST_FILE);

        let manifest_bytes = tokio::fs::read(&manifest_path)
            .await
            .map_err(|e| IngestError::store_read(&manifest_path, e))?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| IngestError::store_read(&manifest_path, e))?;

        let mut on_disk = list_parts(&dir).await?;
        let mut expected: Vec<&str> = manifest.parts.iter().map(|p| p.file.as_str()).collect();
        on_disk.sort();
        expected.sort_unstable();
        if on_disk != expected {
            return Err(IngestError::store_read(
                &dir,
                format!("part files {:?} do not match manifest {:?}", on_disk, expected),
            ));
        }

        let mut records = Vec::with_capacity(manifest.row_count);
        for part in &manifest.parts {
            let path = dir.join(&part.file);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| IngestError::store_read(&path, e))?;
            verify_checksum(&part.file, &bytes, &part.sha256)
                .map_err(|e| IngestError::store_read(&path, e))?;

            let rows = decode_part(&bytes).map_err(|reason| IngestError::store_read(&path, reason))?;
            if rows.len() != part.rows {
                return Err(IngestError::store_read(
                    &path,
                    format!("expected {} rows, found {}", part.rows, rows.len()),
                ));
            }
            debug!(part = %part.file, rows = rows.len(), "Read snapshot part");
            records.extend(rows);
        }

        if records.len() != manifest.row_count {
            return Err(IngestError::store_read(
                &dir,
                format!("manifest lists {} rows, parts hold {}", manifest.row_count, records.len()),
            ));
        }

        Ok(records)
    }

    async fn stage_generation(&self, dir: &Path, records: &[DerivedRecord]) -> Result<usize> {
        tokio::fs::create_dir(dir)
            .await
            .map_err(|e| IngestError::store_write(dir, e))?;

        let mut parts = Vec::new();
        let chunks: Vec<&[DerivedRecord]> = if records.is_empty() {
            vec![records]
        } else {
            records.chunks(self.rows_per_part).collect()
        };

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let file = format!("{}{:05}.csv", PART_PREFIX, idx);
            let path = dir.join(&file);
            let bytes = encode_part(chunk).map_err(|reason| IngestError::store_write(&path, reason))?;
            let sha256 = checksum_bytes(&bytes);
            write_synced(&path, &bytes)
                .await
                .map_err(|e| IngestError::store_write(&path, e))?;
            parts.push(PartEntry {
                file,
                rows: chunk.len(),
                sha256,
            });
        }

        let part_count = parts.len();
        let manifest = Manifest {
            written_at: Utc::now(),
            row_count: records.len(),
            parts,
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| IngestError::store_write(&manifest_path, e))?;
        write_synced(&manifest_path, &manifest_bytes)
            .await
            .map_err(|e| IngestError::store_write(&manifest_path, e))?;
        sync_dir(dir).await.map_err(|e| IngestError::store_write(dir, e))?;

        Ok(part_count)
    }

    /// Atomically point `CURRENT` at `generation`
    async fn swap_current(&self, generation: &str) -> Result<()> {
        let pointer = self.root.join(CURRENT_FILE);
        let staged = self.root.join(format!("{}.tmp", CURRENT_FILE));

        write_synced(&staged, generation.as_bytes())
            .await
            .map_err(|e| IngestError::store_write(&staged, e))?;
        tokio::fs::rename(&staged, &pointer)
            .await
            .map_err(|e| IngestError::store_write(&pointer, e))?;

        // The rename is committed at this point; a failed sync must not undo it
        if let Err(e) = sync_dir(&self.root).await {
            warn!(error = %e, root = %self.root.display(), "Failed to sync snapshot location after swap");
        }
        Ok(())
    }

    /// Best effort; a leftover generation is harmless
    async fn remove_stale_generations(&self, keep: &str) {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, root = %self.root.display(), "Could not list snapshot location for cleanup");
                return;
            },
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, root = %self.root.display(), "Stopped listing snapshot location during cleanup");
                    break;
                },
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(GENERATION_PREFIX) || name == keep {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => debug!(generation = %name, "Removed stale generation"),
                Err(e) => warn!(generation = %name, error = %e, "Failed to remove stale generation"),
            }
        }
    }
}

#[async_trait]
impl SnapshotStore for CsvSnapshotStore {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn load(&self) -> Result<Vec<DerivedRecord>> {
        let Some(generation) = self.current_generation().await? else {
            info!("No committed snapshot, starting from empty");
            return Ok(Vec::new());
        };

        let records = self.read_generation(&generation).await?;
        info!(generation = %generation, rows = records.len(), "Loaded snapshot");
        Ok(records)
    }

    #[instrument(skip(self, records), fields(root = %self.root.display(), rows = records.len()))]
    async fn replace(&self, records: &[DerivedRecord]) -> Result<SnapshotReceipt> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| IngestError::store_write(&self.root, e))?;

        let generation = format!(
            "{}{}-{}",
            GENERATION_PREFIX,
            Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
            Uuid::new_v4().simple()
        );
        let dir = self.root.join(&generation);

        let staged = match self.stage_generation(&dir, records).await {
            Ok(parts) => self.swap_current(&generation).await.map(|_| parts),
            Err(e) => Err(e),
        };
        let parts = match staged {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                    warn!(error = %cleanup, generation = %generation, "Failed to remove aborted generation");
                }
                return Err(e);
            },
        };

        info!(generation = %generation, rows = records.len(), parts, "Committed snapshot");
        self.remove_stale_generations(&generation).await;

        Ok(SnapshotReceipt {
            location: self.root.clone(),
            generation,
            row_count: records.len(),
            parts,
        })
    }

    fn location(&self) -> &Path {
        &self.root
    }
}

async fn list_parts(dir: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| IngestError::store_read(dir, e))?;

    let mut parts = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| IngestError::store_read(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(PART_PREFIX) && name.ends_with(".csv") {
            parts.push(name);
        }
    }
    Ok(parts)
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Flush directory entries (created or renamed files) to disk
#[cfg(unix)]
async fn sync_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(path).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn encode_part(records: &[DerivedRecord]) -> std::result::Result<Vec<u8>, String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(SNAPSHOT_COLUMNS).map_err(|e| e.to_string())?;
    for record in records {
        writer.serialize(record).map_err(|e| e.to_string())?;
    }
    writer.into_inner().map_err(|e| e.to_string())
}

fn decode_part(bytes: &[u8]) -> std::result::Result<Vec<DerivedRecord>, String> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    reader
        .deserialize::<DerivedRecord>()
        .enumerate()
        .map(|(idx, row)| row.map_err(|e| format!("row {}: {}", idx + 1, e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;

    fn record(identity: &str, description: &str) -> DerivedRecord {
        DerivedRecord {
            invoice_id: "536365".to_string(),
            stock_code: "85123A".to_string(),
            description: description.to_string(),
            quantity: 6,
            invoice_timestamp: NaiveDate::from_ymd_opt(2010, 12, 1)
                .unwrap()
                .and_hms_opt(8, 26, 0)
                .unwrap(),
            unit_price: "2.55".parse().unwrap(),
            customer_id: 17850,
            country: "United Kingdom".to_string(),
            total_amount: "15.30".parse().unwrap(),
            order_year: 2010,
            order_month: 12,
            version: Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap(),
            identity: identity.to_string(),
        }
    }

    #[test]
    fn test_snapshot_columns_match_serialized_fields() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(record("h", "d")).unwrap();
        let bytes = writer.into_inner().unwrap();
        let header = String::from_utf8(bytes).unwrap().lines().next().unwrap().to_string();

        assert_eq!(header, SNAPSHOT_COLUMNS.join(","));
    }

    #[test]
    fn test_part_encoding_keeps_values_exact() {
        let original = vec![record("h1", "SET OF 3, \"RED\""), record("h2", "")];
        let decoded = decode_part(&encode_part(&original).unwrap()).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(decoded[0].total_amount, Decimal::new(1530, 2));
    }

    #[tokio::test]
    async fn test_missing_location_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path().join("transformed"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_splits_parts_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path()).with_rows_per_part(2);
        let records: Vec<_> = (0..5).map(|i| record(&format!("h{}", i), "d")).collect();

        let receipt = store.replace(&records).await.unwrap();
        assert_eq!(receipt.row_count, 5);
        assert_eq!(receipt.parts, 3);

        assert_eq!(store.load().await.unwrap(), records);
    }

    #[tokio::test]
    async fn test_empty_snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path());

        let receipt = store.replace(&[]).await.unwrap();
        assert_eq!(receipt.parts, 1);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_overwrites_and_cleans_old_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path());

        let first = store.replace(&[record("a", "d")]).await.unwrap();
        let second = store.replace(&[record("b", "d")]).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].identity, "b");
        assert!(!dir.path().join(&first.generation).exists());
        assert!(dir.path().join(&second.generation).exists());
    }

    #[tokio::test]
    async fn test_uncommitted_generation_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path());
        store.replace(&[record("a", "d")]).await.unwrap();

        // A crash between staging and swap leaves an orphan generation behind
        let orphan = dir.path().join("gen-orphan");
        std::fs::create_dir(&orphan).unwrap();
        std::fs::write(orphan.join("part-00000.csv"), "garbage").unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].identity, "a");

        store.replace(&[record("b", "d")]).await.unwrap();
        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn test_swap_leaves_pointer_on_new_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path());
        let receipt = store.replace(&[record("a", "d")]).await.unwrap();

        let pointer = std::fs::read_to_string(dir.path().join(CURRENT_FILE)).unwrap();
        assert_eq!(pointer, receipt.generation);
        assert!(!dir.path().join("CURRENT.tmp").exists());
        assert_eq!(store.current_generation().await.unwrap(), Some(receipt.generation));
    }

    #[tokio::test]
    async fn test_failed_swap_keeps_prior_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path());
        let first = store.replace(&[record("a", "d")]).await.unwrap();

        // A directory in the way makes writing the staged pointer fail
        std::fs::create_dir(dir.path().join("CURRENT.tmp")).unwrap();

        let err = store.replace(&[record("b", "d")]).await.unwrap_err();
        assert!(matches!(err, IngestError::StoreWrite { .. }), "{:?}", err);

        let generations: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(GENERATION_PREFIX))
            .collect();
        assert_eq!(generations, vec![first.generation.clone()]);

        let pointer = std::fs::read_to_string(dir.path().join(CURRENT_FILE)).unwrap();
        assert_eq!(pointer, first.generation);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].identity, "a");
    }

    #[tokio::test]
    async fn test_tampered_part_is_store_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path());
        let receipt = store.replace(&[record("a", "d")]).await.unwrap();

        let part = dir.path().join(&receipt.generation).join("part-00000.csv");
        let mut contents = std::fs::read_to_string(&part).unwrap();
        contents = contents.replace("15.30", "99.99");
        std::fs::write(&part, contents).unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, IngestError::StoreRead { .. }));
    }

    #[tokio::test]
    async fn test_missing_manifest_is_store_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path());
        let receipt = store.replace(&[record("a", "d")]).await.unwrap();

        std::fs::remove_file(dir.path().join(&receipt.generation).join(MANIFEST_FILE)).unwrap();

        assert!(matches!(store.load().await, Err(IngestError::StoreRead { .. })));
    }

    #[tokio::test]
    async fn test_dangling_pointer_is_store_read_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CURRENT_FILE), "gen-missing").unwrap();

        let store = CsvSnapshotStore::new(dir.path());
        assert!(matches!(store.load().await, Err(IngestError::StoreRead { .. })));
    }

    #[tokio::test]
    async fn test_pointer_outside_location_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CURRENT_FILE), "gen-x/../../etc").unwrap();

        let store = CsvSnapshotStore::new(dir.path());
        assert!(matches!(store.load().await, Err(IngestError::StoreRead { .. })));
    }
}
