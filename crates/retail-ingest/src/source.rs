//! Raw batch files and the archive of consumed batches

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::models::RawBatch;

/// File name prefix of archived batches
pub const ARCHIVE_PREFIX: &str = "online_retail_";

/// Read a header-driven CSV batch; every cell stays an untyped string
pub async fn read_batch(path: impl AsRef<Path>) -> Result<RawBatch> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| IngestError::source(path, e))?;

    let batch = parse_batch(&bytes).map_err(|e| match e {
        IngestError::Schema(msg) => IngestError::schema(format!("{}: {}", path.display(), msg)),
        other => other,
    })?;

    debug!(path = %path.display(), rows = batch.len(), columns = batch.headers().len(), "Read raw batch");
    Ok(batch)
}

/// Parse CSV bytes into a batch
pub fn parse_batch(bytes: &[u8]) -> Result<RawBatch> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| IngestError::schema(format!("unreadable header row: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(IngestError::schema("batch has no header row"));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::schema(format!("malformed CSV: {}", e)))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    RawBatch::new(headers, rows)
}

/// Serialize a batch back to CSV bytes
pub fn render_batch(batch: &RawBatch) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(batch.headers())
        .and_then(|_| batch.rows().iter().try_for_each(|row| writer.write_record(row)))
        .map_err(|e| IngestError::schema(format!("failed to encode batch: {}", e)))?;

    writer
        .into_inner()
        .map_err(|e| IngestError::schema(format!("failed to encode batch: {}", e)))
}

pub async fn write_batch(path: impl AsRef<Path>, batch: &RawBatch) -> Result<()> {
    let path = path.as_ref();
    let bytes = render_batch(batch)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| IngestError::source(parent, e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| IngestError::source(path, e))
}

/// Directory of batches consumed by earlier successful runs
///
/// Archived names embed the archive time, so lexicographic order is
/// chronological order.
#[derive(Debug, Clone)]
pub struct BatchArchive {
    dir: PathBuf,
}

impl BatchArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The most recently archived batch, if any
    pub async fn latest(&self) -> Result<Option<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(dir = %self.dir.display(), "Batch archive does not exist yet");
                return Ok(None);
            },
            Err(e) => return Err(IngestError::source(&self.dir, e)),
        };

        let mut latest: Option<PathBuf> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IngestError::source(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if latest
                .as_ref()
                .is_none_or(|current| path.file_name() > current.file_name())
            {
                latest = Some(path);
            }
        }

        match &latest {
            Some(path) => info!(path = %path.display(), "Found latest archived batch"),
            None => info!(dir = %self.dir.display(), "No archived batch found"),
        }
        Ok(latest)
    }

    /// Copy a consumed batch into the archive under a timestamped name
    pub async fn archive(&self, batch: impl AsRef<Path>, at: DateTime<Utc>) -> Result<PathBuf> {
        let batch = batch.as_ref();
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| IngestError::source(&self.dir, e))?;

        let name = format!("{}{}.csv", ARCHIVE_PREFIX, at.format("%Y-%m-%d-%H-%M-%S-%3f"));
        let dest = self.dir.join(&name);
        // Staged under a non-csv name so `latest` never sees a partial copy
        let staged = self.dir.join(format!(".{}.tmp", name));

        tokio::fs::copy(batch, &staged)
            .await
            .map_err(|e| IngestError::source(batch, e))?;
        tokio::fs::rename(&staged, &dest)
            .await
            .map_err(|e| IngestError::source(&dest, e))?;

        info!(from = %batch.display(), to = %dest.display(), "Archived consumed batch");
        Ok(dest)
    }
}
