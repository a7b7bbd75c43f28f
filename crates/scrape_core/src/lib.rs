//! Scrape core: pure data model, dedup keys, record building and reconciliation.
mod dedupe;
mod reconcile;
mod record;
mod report;
mod strategy;
mod types;

pub use dedupe::{normalize_url_for_dedupe, request_host};
pub use reconcile::{reconcile, RowId, RowRef, StoreIndex, WriteOp, WritePlan};
pub use record::{build_record, ContentRecord};
pub use report::{AttemptSummary, Disposition, FeedTotals, ItemReport, RunReport, WriteKind};
pub use strategy::{ChainError, Strategy, StrategyChain, StrategyDescriptor};
pub use types::{AttemptOutcome, ExtractionAttempt, ExtractionResult, FeedItem, PageMetadata};
