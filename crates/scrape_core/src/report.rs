use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategy::Strategy;
use crate::types::{AttemptOutcome, ExtractionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteKind {
    Insert,
    Update,
    /// Update whose content matched the stored row.
    Unchanged,
    /// Not written, e.g. extraction was interrupted by shutdown.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "strategy")]
pub enum Disposition {
    Extracted(Strategy),
    Degraded,
    Interrupted,
}

impl Disposition {
    pub fn of(result: &ExtractionResult) -> Self {
        if result.interrupted {
            return Disposition::Interrupted;
        }
        match result.final_strategy_used {
            Some(strategy) => Disposition::Extracted(strategy),
            None => Disposition::Degraded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptSummary {
    pub strategy: Strategy,
    pub outcome: AttemptOutcome,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemReport {
    pub url: String,
    pub dedup_key: String,
    pub source_feed: String,
    pub disposition: Disposition,
    pub attempts: Vec<AttemptSummary>,
    pub write: WriteKind,
}

impl ItemReport {
    pub fn new(
        url: &str,
        dedup_key: &str,
        source_feed: &str,
        result: &ExtractionResult,
        write: WriteKind,
    ) -> Self {
        Self {
            url: url.to_string(),
            dedup_key: dedup_key.to_string(),
            source_feed: source_feed.to_string(),
            disposition: Disposition::of(result),
            attempts: result
                .attempts
                .iter()
                .map(|attempt| AttemptSummary {
                    strategy: attempt.strategy,
                    outcome: attempt.outcome,
                    detail: attempt.detail.clone(),
                })
                .collect(),
            write,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedTotals {
    pub total: usize,
    pub extracted: usize,
    pub degraded: usize,
    pub interrupted: usize,
}

/// Full accounting of one pipeline run: one entry per input item, none dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items: Vec<ItemReport>,
    pub feeds: BTreeMap<String, FeedTotals>,
    /// Non-success attempt outcomes across all items, keyed by outcome name.
    pub failure_reasons: BTreeMap<String, usize>,
}

impl RunReport {
    pub fn from_items(
        items: Vec<ItemReport>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let mut feeds: BTreeMap<String, FeedTotals> = BTreeMap::new();
        let mut failure_reasons: BTreeMap<String, usize> = BTreeMap::new();

        for item in &items {
            let totals = feeds.entry(item.source_feed.clone()).or_default();
            totals.total += 1;
            match item.disposition {
                Disposition::Extracted(_) => totals.extracted += 1,
                Disposition::Degraded => totals.degraded += 1,
                Disposition::Interrupted => totals.interrupted += 1,
            }
            for attempt in &item.attempts {
                if attempt.outcome != AttemptOutcome::Success {
                    *failure_reasons
                        .entry(attempt.outcome.to_string())
                        .or_default() += 1;
                }
            }
        }

        Self {
            started_at,
            finished_at,
            items,
            feeds,
            failure_reasons,
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn extracted(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Extracted(_)))
    }

    pub fn degraded(&self) -> usize {
        self.count(|d| d == Disposition::Degraded)
    }

    pub fn interrupted(&self) -> usize {
        self.count(|d| d == Disposition::Interrupted)
    }

    /// Share of items whose full text was extracted, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.extracted() as f64 * 100.0 / self.items.len() as f64
    }

    pub fn writes_of(&self, kind: WriteKind) -> usize {
        self.items.iter().filter(|item| item.write == kind).count()
    }

    fn count(&self, predicate: impl Fn(Disposition) -> bool) -> usize {
        self.items
            .iter()
            .filter(|item| predicate(item.disposition))
            .count()
    }
}
