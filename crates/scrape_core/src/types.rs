use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategy::Strategy;

/// One entry discovered in a feed. Owned by the feed collaborator; never mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_feed: String,
}

impl FeedItem {
    pub fn new(url: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            summary: summary.into(),
            published_at: None,
            source_feed: String::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_source_feed(mut self, feed: impl Into<String>) -> Self {
        self.source_feed = feed.into();
        self
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    Blocked,
    Timeout,
    ParseFailure,
    NetworkError,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Blocked => "blocked",
            AttemptOutcome::Timeout => "timeout",
            AttemptOutcome::ParseFailure => "parse failure",
            AttemptOutcome::NetworkError => "network error",
        })
    }
}

/// Diagnostic trace of one strategy tried against one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionAttempt {
    pub strategy: Strategy,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    /// Parsed body, present whenever parsing got that far (even below threshold).
    pub content: Option<String>,
    pub quality_score: Option<f64>,
    /// Human readable reason, e.g. `"http status 403"`.
    pub detail: String,
}

/// Page-level metadata recovered from the accepted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub final_content: String,
    pub final_strategy_used: Option<Strategy>,
    pub attempts: Vec<ExtractionAttempt>,
    /// No strategy met the acceptance threshold; content came from the feed.
    pub degraded: bool,
    /// Cancellation stopped escalation before the chain was exhausted.
    pub interrupted: bool,
    pub metadata: Option<PageMetadata>,
    pub quality_score: Option<f64>,
}

impl ExtractionResult {
    pub fn word_count(&self) -> usize {
        self.final_content.split_whitespace().count()
    }
}
