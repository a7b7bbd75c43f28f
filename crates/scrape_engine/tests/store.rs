use std::fs;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use scrape_core::{build_record, reconcile, ExtractionResult, FeedItem, Strategy, WriteKind};
use scrape_engine::{JsonFileStore, RecordStore, StoreError};
use tempfile::TempDir;

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, day, 6, 0, 0).unwrap()
}

fn result(content: &str) -> ExtractionResult {
    ExtractionResult {
        final_content: content.to_string(),
        final_strategy_used: Some(Strategy::Enhanced),
        attempts: Vec::new(),
        degraded: false,
        interrupted: false,
        metadata: None,
        quality_score: Some(220.0),
    }
}

fn record(url: &str, content: &str, now: DateTime<Utc>) -> scrape_core::ContentRecord {
    let item = FeedItem::new(url, "summary").with_source_feed("feed");
    build_record(&item, &result(content), now)
}

#[test]
fn missing_file_is_an_empty_store() {
    let temp = TempDir::new().unwrap();
    let store = JsonFileStore::new(temp.path().join("articles.json"));
    assert!(store.lookup_index().unwrap().is_empty());
    assert!(store.rows().unwrap().is_empty());
}

#[test]
fn applied_rows_survive_reopening() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("data").join("articles.json");

    let store = JsonFileStore::new(&path);
    let plan = reconcile(
        vec![
            record("https://a.com/1", "one", at(1)),
            record("https://a.com/2", "two", at(1)),
        ],
        &store.lookup_index().unwrap(),
        at(1),
    );
    let summary = store.apply(&plan).unwrap();
    assert_eq!(summary.inserted, 2);

    let reopened = JsonFileStore::new(&path);
    let index = reopened.lookup_index().unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index["a.com/1"].created_at, at(1));

    let revision = reconcile(
        vec![record("https://a.com/1", "one, revised", at(2))],
        &index,
        at(2),
    );
    assert_eq!(revision.kind_for("a.com/1"), Some(WriteKind::Update));
    reopened.apply(&revision).unwrap();

    let rows = JsonFileStore::new(&path).rows().unwrap();
    let revised = rows
        .iter()
        .find(|row| row.record.dedup_key == "a.com/1")
        .unwrap();
    assert_eq!(revised.record.content, "one, revised");
    assert_eq!(revised.record.created_at, at(1));
    assert_eq!(revised.record.updated_at, at(2));
    assert_eq!(revised.row_id, index["a.com/1"].row_id);
}

#[test]
fn stale_plan_is_rejected_without_touching_the_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("articles.json");
    let store = JsonFileStore::new(&path);

    let empty_index = store.lookup_index().unwrap();
    let first = reconcile(vec![record("https://a.com/1", "one", at(1))], &empty_index, at(1));
    store.apply(&first).unwrap();
    let before = fs::read_to_string(&path).unwrap();

    // Planned against the empty index, so it inserts a key that now exists.
    let stale = reconcile(vec![record("https://a.com/1", "other", at(2))], &empty_index, at(2));
    let err = store.apply(&stale).unwrap_err();

    assert!(matches!(err, StoreError::DuplicateKey(ref key) if key == "a.com/1"));
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn corrupt_file_is_reported() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("articles.json");
    fs::write(&path, "{ not json").unwrap();

    let err = JsonFileStore::new(&path).lookup_index().unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));
}
