use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use scrape_core::{ContentRecord, RowId, RowRef, StoreIndex, WriteKind, WriteOp, WritePlan};
use scrape_logging::scrape_debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persist::{write_json, PersistError};

const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub row_id: RowId,
    #[serde(flatten)]
    pub record: ContentRecord,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("insert for key {0} that already has a row")]
    DuplicateKey(String),
    #[error("update for unknown row {0}")]
    UnknownRow(RowId),
    #[error("store file {path} is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported store version {0}")]
    Version(u32),
    #[error("store io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Durable rows keyed by dedup key. `apply` either commits a whole plan or nothing.
pub trait RecordStore: Send + Sync {
    fn lookup_index(&self) -> Result<StoreIndex, StoreError>;
    fn apply(&self, plan: &WritePlan) -> Result<ApplySummary, StoreError>;
    fn rows(&self) -> Result<Vec<StoredRow>, StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Table {
    rows: Vec<StoredRow>,
}

impl Table {
    fn index(&self) -> StoreIndex {
        self.rows
            .iter()
            .map(|row| {
                (
                    row.record.dedup_key.clone(),
                    RowRef {
                        row_id: row.row_id,
                        created_at: row.record.created_at,
                        content_digest: Some(row.record.content_digest()),
                    },
                )
            })
            .collect()
    }

    /// Applies `plan` to a copy and returns it; `self` is untouched on error.
    fn applied(&self, plan: &WritePlan) -> Result<(Table, ApplySummary), StoreError> {
        let mut next = self.clone();
        let mut by_id: HashMap<RowId, usize> = next
            .rows
            .iter()
            .enumerate()
            .map(|(pos, row)| (row.row_id, pos))
            .collect();
        let mut keys: HashSet<String> = next
            .rows
            .iter()
            .map(|row| row.record.dedup_key.clone())
            .collect();
        let mut summary = ApplySummary::default();

        for op in &plan.writes {
            match op {
                WriteOp::Insert { row_id, record } => {
                    if !keys.insert(record.dedup_key.clone()) || by_id.contains_key(row_id) {
                        return Err(StoreError::DuplicateKey(record.dedup_key.clone()));
                    }
                    by_id.insert(*row_id, next.rows.len());
                    next.rows.push(StoredRow {
                        row_id: *row_id,
                        record: record.clone(),
                    });
                    summary.inserted += 1;
                }
                WriteOp::Update { row_id, record, .. } => {
                    let pos = *by_id.get(row_id).ok_or(StoreError::UnknownRow(*row_id))?;
                    let stored = &mut next.rows[pos];
                    if stored.record.dedup_key != record.dedup_key {
                        if !keys.insert(record.dedup_key.clone()) {
                            return Err(StoreError::DuplicateKey(record.dedup_key.clone()));
                        }
                        keys.remove(&stored.record.dedup_key);
                    }
                    stored.record = record.clone();
                    match op.kind() {
                        WriteKind::Unchanged => summary.unchanged += 1,
                        _ => summary.updated += 1,
                    }
                }
            }
        }
        Ok((next, summary))
    }
}

/// Process-local store, used by `extract` runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn lookup_index(&self) -> Result<StoreIndex, StoreError> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(table.index())
    }

    fn apply(&self, plan: &WritePlan) -> Result<ApplySummary, StoreError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let (next, summary) = table.applied(plan)?;
        *table = next;
        Ok(summary)
    }

    fn rows(&self) -> Result<Vec<StoredRow>, StoreError> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(table.rows.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    rows: Vec<StoredRow>,
}

/// All rows in one JSON document, replaced atomically on every apply.
///
/// A missing file is an empty store.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Table, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Table::default()),
            Err(err) => return Err(err.into()),
        };
        let document: StoreDocument =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        if document.version != STORE_VERSION {
            return Err(StoreError::Version(document.version));
        }
        Ok(Table {
            rows: document.rows,
        })
    }
}

impl RecordStore for JsonFileStore {
    fn lookup_index(&self) -> Result<StoreIndex, StoreError> {
        Ok(self.load()?.index())
    }

    fn apply(&self, plan: &WritePlan) -> Result<ApplySummary, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (next, summary) = self.load()?.applied(plan)?;
        if plan.is_empty() {
            return Ok(summary);
        }
        let document = StoreDocument {
            version: STORE_VERSION,
            rows: next.rows,
        };
        let written = write_json(&self.path, &document)?;
        scrape_debug!(
            "stored {} rows in {} (+{} inserted, {} updated)",
            document.rows.len(),
            written.display(),
            summary.inserted,
            summary.updated
        );
        Ok(summary)
    }

    fn rows(&self) -> Result<Vec<StoredRow>, StoreError> {
        Ok(self.load()?.rows)
    }
}
