//! Local filesystem backend for the processed record.
//!
//! Every operation reads the whole file; every mutation rewrites it through a
//! temp file and a rename. This is fine for a few hundred ids. There is no
//! cross-process locking, so only one monitor may use a given file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::storage::{EvictionReport, ProcessedRecord, ProcessedStore};

/// JSON-file backed processed record.
pub struct LocalProcessedStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl LocalProcessedStore {
    /// Create a store for `path` without touching the filesystem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store and write an empty record if the file is missing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(path);
        if tokio::fs::metadata(&store.path).await.is_err() {
            log::info!("Creating processed record at {}", store.path.display());
            store.save(&ProcessedRecord::default()).await?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Load the record; a missing or unreadable document yields an empty one.
    async fn load(&self) -> Result<ProcessedRecord> {
        let Some(bytes) = self.read_bytes().await? else {
            return Ok(ProcessedRecord::default());
        };
        match ProcessedRecord::from_json(&bytes) {
            Ok(record) => Ok(record),
            Err(e) => {
                log::error!(
                    "Processed record {} is corrupt ({}); starting from an empty record",
                    self.path.display(),
                    e
                );
                Ok(ProcessedRecord::default())
            }
        }
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn save(&self, record: &ProcessedRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = record.to_json()?;
        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ProcessedStore for LocalProcessedStore {
    async fn is_processed(&self, id: &str) -> Result<bool> {
        Ok(self.load().await?.contains(id))
    }

    async fn mark_processed(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load().await?;
        if record.insert(id, Utc::now()) {
            log::debug!("Marked {} as processed", id);
        }
        self.save(&record).await
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }

    async fn evict_older_than(&self, age: Duration) -> Result<EvictionReport> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load().await?;
        let report = record.evict_older_than(age, Utc::now());
        if report.removed > 0 {
            self.save(&record).await?;
            log::info!(
                "Evicted {} processed entries older than {} days",
                report.removed,
                age.num_days()
            );
        }
        Ok(report)
    }

    async fn last_check(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.load().await?.last_check)
    }

    async fn export(&self) -> Result<ProcessedRecord> {
        self.load().await
    }

    async fn import(&self, incoming: ProcessedRecord) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load().await?;
        let added = record.merge(incoming);
        self.save(&record).await?;
        Ok(added)
    }
}
