use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use scrape_logging::scrape_debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::ContentRecord;
use crate::report::WriteKind;

/// Store-side row identity. Assigned once at insert and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub Uuid);

impl RowId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the store knows about an existing row, as far as reconciliation cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRef {
    pub row_id: RowId,
    pub created_at: DateTime<Utc>,
    pub content_digest: Option<String>,
}

/// `dedup_key -> row` snapshot taken before a batch is reconciled.
pub type StoreIndex = HashMap<String, RowRef>;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert {
        row_id: RowId,
        record: ContentRecord,
    },
    Update {
        row_id: RowId,
        record: ContentRecord,
        /// Nothing but `updated_at` differs from the stored row.
        unchanged: bool,
    },
}

impl WriteOp {
    pub fn row_id(&self) -> RowId {
        match self {
            WriteOp::Insert { row_id, .. } | WriteOp::Update { row_id, .. } => *row_id,
        }
    }

    pub fn record(&self) -> &ContentRecord {
        match self {
            WriteOp::Insert { record, .. } | WriteOp::Update { record, .. } => record,
        }
    }

    pub fn kind(&self) -> WriteKind {
        match self {
            WriteOp::Insert { .. } => WriteKind::Insert,
            WriteOp::Update {
                unchanged: true, ..
            } => WriteKind::Unchanged,
            WriteOp::Update { .. } => WriteKind::Update,
        }
    }
}

/// The complete set of writes for one batch: at most one per dedup key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    pub writes: Vec<WriteOp>,
    /// Records dropped because a later record in the batch had the same key.
    pub collapsed: usize,
}

impl WritePlan {
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn inserts(&self) -> impl Iterator<Item = &WriteOp> {
        self.writes
            .iter()
            .filter(|op| matches!(op, WriteOp::Insert { .. }))
    }

    pub fn updates(&self) -> impl Iterator<Item = &WriteOp> {
        self.writes
            .iter()
            .filter(|op| matches!(op, WriteOp::Update { .. }))
    }

    pub fn kind_for(&self, dedup_key: &str) -> Option<WriteKind> {
        self.writes
            .iter()
            .find(|op| op.record().dedup_key == dedup_key)
            .map(WriteOp::kind)
    }

    /// Write kind per dedup key, for callers looking up many keys at once.
    pub fn kinds_by_key(&self) -> HashMap<&str, WriteKind> {
        self.writes
            .iter()
            .map(|op| (op.record().dedup_key.as_str(), op.kind()))
            .collect()
    }
}

/// Merges a batch into the store's current index without creating duplicates.
///
/// Known keys become updates that keep the stored row id and `created_at`;
/// unknown keys become inserts with a new row id. Repeated keys in `records`
/// collapse to the last occurrence, placed where the key first appeared.
pub fn reconcile(
    records: impl IntoIterator<Item = ContentRecord>,
    index: &StoreIndex,
    now: DateTime<Utc>,
) -> WritePlan {
    let mut latest: Vec<ContentRecord> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut collapsed = 0;

    for record in records {
        match position.get(&record.dedup_key) {
            Some(&slot) => {
                scrape_debug!(
                    "reconcile: later record replaces earlier one for key={}",
                    record.dedup_key
                );
                latest[slot] = record;
                collapsed += 1;
            }
            None => {
                position.insert(record.dedup_key.clone(), latest.len());
                latest.push(record);
            }
        }
    }

    let writes = latest
        .into_iter()
        .map(|mut record| {
            record.updated_at = now;
            match index.get(&record.dedup_key) {
                Some(existing) => {
                    record.created_at = existing.created_at;
                    let unchanged = existing
                        .content_digest
                        .as_deref()
                        .is_some_and(|digest| digest == record.content_digest());
                    WriteOp::Update {
                        row_id: existing.row_id,
                        record,
                        unchanged,
                    }
                }
                None => {
                    record.created_at = now;
                    WriteOp::Insert {
                        row_id: RowId::generate(),
                        record,
                    }
                }
            }
        })
        .collect();

    WritePlan { writes, collapsed }
}
