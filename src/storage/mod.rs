//! Persistence of already-notified tenders.
//!
//! The processed record is one JSON document:
//!
//! ```text
//! {
//!   "processed_tenders": { "<registry id>": "<first seen, RFC 3339>" | null },
//!   "last_check": "<RFC 3339>" | null
//! }
//! ```
//!
//! Older deployments wrote `processed_tenders` as a plain array of ids, or the
//! array alone. Both are accepted and decoded into the keyed shape with an
//! unknown timestamp per id; the file is rewritten in the keyed shape on the
//! first mutation.

pub mod local;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::parse_timestamp;

// Re-export for convenience
pub use local::LocalProcessedStore;

/// Shape the record had on disk when it was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
    /// `processed_tenders` is an id → timestamp map
    #[default]
    Keyed,
    /// `processed_tenders` is a list of ids without timestamps
    Legacy,
}

/// Outcome of an eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Entries removed for being older than the retention window
    pub removed: usize,
    /// Entries kept because their age is unknown
    pub legacy: usize,
}

/// In-memory form of the processed record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedRecord {
    /// Registry id → time the notification was confirmed (`None` if unknown)
    pub entries: BTreeMap<String, Option<DateTime<Utc>>>,
    /// Time of the last successful mark
    pub last_check: Option<DateTime<Utc>>,
    pub format: RecordFormat,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Keyed {
        processed_tenders: BTreeMap<String, Option<String>>,
        #[serde(default)]
        last_check: Option<String>,
    },
    Listed {
        processed_tenders: Vec<String>,
        #[serde(default)]
        last_check: Option<String>,
    },
    Bare(Vec<String>),
}

#[derive(Serialize)]
struct StoredRecordRef<'a> {
    processed_tenders: &'a BTreeMap<String, Option<DateTime<Utc>>>,
    last_check: Option<DateTime<Utc>>,
}

impl ProcessedRecord {
    /// Decode any supported on-disk shape.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let stored: StoredRecord = serde_json::from_slice(bytes)?;
        let record = match stored {
            StoredRecord::Keyed {
                processed_tenders,
                last_check,
            } => Self {
                entries: processed_tenders
                    .into_iter()
                    .map(|(id, ts)| (id, ts.as_deref().and_then(parse_timestamp)))
                    .collect(),
                last_check: last_check.as_deref().and_then(parse_timestamp),
                format: RecordFormat::Keyed,
            },
            StoredRecord::Listed {
                processed_tenders,
                last_check,
            } => Self::from_legacy(processed_tenders, last_check.as_deref()),
            StoredRecord::Bare(ids) => Self::from_legacy(ids, None),
        };
        Ok(record)
    }

    fn from_legacy(ids: Vec<String>, last_check: Option<&str>) -> Self {
        Self {
            entries: ids.into_iter().map(|id| (id, None)).collect(),
            last_check: last_check.and_then(parse_timestamp),
            format: RecordFormat::Legacy,
        }
    }

    /// Encode in the keyed shape.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let stored = StoredRecordRef {
            processed_tenders: &self.entries,
            last_check: self.last_check,
        };
        Ok(serde_json::to_vec_pretty(&stored)?)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `id` as notified at `now`. Returns `true` if it was new.
    ///
    /// An existing entry keeps its original timestamp; only `last_check`
    /// moves.
    pub fn insert(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        self.format = RecordFormat::Keyed;
        self.last_check = Some(now);
        if self.entries.contains_key(id) {
            return false;
        }
        self.entries.insert(id.to_string(), Some(now));
        true
    }

    /// Drop entries first seen before `now - age`.
    ///
    /// A record still in the legacy shape is left untouched.
    pub fn evict_older_than(&mut self, age: Duration, now: DateTime<Utc>) -> EvictionReport {
        let legacy = self.entries.values().filter(|ts| ts.is_none()).count();
        if self.format == RecordFormat::Legacy {
            return EvictionReport { removed: 0, legacy };
        }

        // An age reaching past the representable range evicts nothing.
        let cutoff = now
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.entries.len();
        self.entries
            .retain(|_, ts| ts.map_or(true, |seen| seen >= cutoff));

        EvictionReport {
            removed: before - self.entries.len(),
            legacy,
        }
    }

    /// Merge entries from another record. Returns how many ids were new.
    pub fn merge(&mut self, other: ProcessedRecord) -> usize {
        let mut added = 0;
        for (id, ts) in other.entries {
            if let std::collections::btree_map::Entry::Vacant(slot) = self.entries.entry(id) {
                slot.insert(ts);
                added += 1;
            }
        }
        if other.last_check > self.last_check {
            self.last_check = other.last_check;
        }
        self.format = RecordFormat::Keyed;
        added
    }
}

/// Trait for processed-record backends.
///
/// Implementations own the backing storage exclusively; callers only go
/// through these operations.
#[async_trait]
pub trait ProcessedStore: Send + Sync {
    /// Whether a notification for `id` was already confirmed.
    async fn is_processed(&self, id: &str) -> Result<bool>;

    /// Record `id` as notified. Marking twice only refreshes `last_check`.
    async fn mark_processed(&self, id: &str) -> Result<()>;

    /// Number of recorded ids.
    async fn count(&self) -> Result<usize>;

    /// Evict entries older than `age`.
    async fn evict_older_than(&self, age: Duration) -> Result<EvictionReport>;

    /// Time of the last successful mark.
    async fn last_check(&self) -> Result<Option<DateTime<Utc>>>;

    /// Snapshot of the whole record.
    async fn export(&self) -> Result<ProcessedRecord>;

    /// Merge a record into the store. Returns how many ids were new.
    async fn import(&self, record: ProcessedRecord) -> Result<usize>;
}
