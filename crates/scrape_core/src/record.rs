use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::dedupe::normalize_url_for_dedupe;
use crate::strategy::Strategy;
use crate::types::{ExtractionResult, FeedItem};

/// The durable, per-article row. `dedup_key` is its only identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub dedup_key: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_feed: String,
    pub strategy_used: Option<Strategy>,
    pub content_quality: f64,
    pub word_count: usize,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentRecord {
    /// SHA-256 over every field except the timestamps, hex encoded.
    ///
    /// Two revisions with the same digest differ only in when they were written.
    pub fn content_digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.dedup_key.as_str(),
            self.url.as_str(),
            self.title.as_str(),
            self.content.as_str(),
            self.author.as_deref().unwrap_or(""),
            self.source_feed.as_str(),
            self.strategy_used.map(Strategy::name).unwrap_or("none"),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        if let Some(published) = self.published_at {
            hasher.update(published.to_rfc3339().as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(self.content_quality.to_bits().to_le_bytes());
        hasher.update([u8::from(self.degraded)]);

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest.iter() {
            let _ = write!(&mut hex, "{byte:02x}");
        }
        hex
    }
}

/// Maps one extraction outcome plus its feed metadata onto a fresh record.
///
/// Both timestamps are `now`; reconciliation restores `created_at` for revisions.
pub fn build_record(item: &FeedItem, result: &ExtractionResult, now: DateTime<Utc>) -> ContentRecord {
    let metadata = result.metadata.clone().unwrap_or_default();

    let title = non_blank(&item.title)
        .or_else(|| metadata.title.as_deref().and_then(non_blank))
        .unwrap_or_else(|| item.url.trim().to_string());

    ContentRecord {
        dedup_key: normalize_url_for_dedupe(&item.url),
        url: item.url.trim().to_string(),
        title,
        content: result.final_content.clone(),
        author: metadata.author.as_deref().and_then(non_blank),
        published_at: item.published_at.or(metadata.published_at),
        source_feed: item.source_feed.clone(),
        strategy_used: result.final_strategy_used,
        content_quality: result.quality_score.unwrap_or(0.0),
        word_count: result.word_count(),
        degraded: result.degraded,
        created_at: now,
        updated_at: now,
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageMetadata;
    use chrono::TimeZone;

    fn accepted_result() -> ExtractionResult {
        ExtractionResult {
            final_content: "one two three".to_string(),
            final_strategy_used: Some(Strategy::Enhanced),
            attempts: Vec::new(),
            degraded: false,
            interrupted: false,
            metadata: Some(PageMetadata {
                title: Some("Page title".to_string()),
                author: Some("  Jane Doe ".to_string()),
                published_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()),
            }),
            quality_score: Some(171.5),
        }
    }

    #[test]
    fn feed_metadata_wins_over_page_metadata() {
        let published = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        let item = FeedItem::new("https://www.a.com/1/", "S")
            .with_title("Feed title")
            .with_source_feed("FreightWaves")
            .with_published_at(published);
        let now = Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap();

        let record = build_record(&item, &accepted_result(), now);

        assert_eq!(record.dedup_key, "a.com/1");
        assert_eq!(record.title, "Feed title");
        assert_eq!(record.author.as_deref(), Some("Jane Doe"));
        assert_eq!(record.published_at, Some(published));
        assert_eq!(record.strategy_used, Some(Strategy::Enhanced));
        assert_eq!(record.word_count, 3);
        assert_eq!(record.created_at, now);
        assert_eq!(record.updated_at, now);
        assert!(!record.degraded);
    }

    #[test]
    fn page_title_fills_in_for_untitled_items() {
        let item = FeedItem::new("a.com/1", "S");
        let now = Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap();
        let record = build_record(&item, &accepted_result(), now);
        assert_eq!(record.title, "Page title");
        assert_eq!(
            record.published_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn digest_ignores_timestamps_only() {
        let item = FeedItem::new("a.com/1", "S").with_title("T");
        let first = build_record(
            &item,
            &accepted_result(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        let mut later = first.clone();
        later.updated_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(first.content_digest(), later.content_digest());

        later.content.push_str(" four");
        assert_ne!(first.content_digest(), later.content_digest());
        assert_eq!(first.content_digest().len(), 64);
    }
}
