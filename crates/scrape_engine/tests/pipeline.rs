use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use scrape_core::{Disposition, FeedItem, Strategy, StrategyChain, WriteKind};
use scrape_engine::{
    ArticleExtractor, ChannelProgressSink, FailureKind, FetchError, FetchMetadata, FetchOutput,
    Fetcher, MemoryStore, OrchestratorConfig, Pipeline, PipelineEvent, RecordStore,
    StrategyOrchestrator, Transports,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Serves canned pages by URL; `hanging` URLs never answer, anything unknown is a 403.
struct SiteFetcher {
    pages: HashMap<String, String>,
    hanging: HashSet<String>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl SiteFetcher {
    fn new(pages: &[(&str, String)]) -> Arc<Self> {
        Self::with_hanging(pages, &[])
    }

    fn with_hanging(pages: &[(&str, String)], hanging: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages
                .iter()
                .map(|(url, html)| (url.to_string(), html.clone()))
                .collect(),
            hanging: hanging.iter().map(|url| url.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait::async_trait]
impl Fetcher for SiteFetcher {
    async fn fetch(&self, url: &str, _strategy: Strategy) -> Result<FetchOutput, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        if self.hanging.contains(url) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let Some(html) = self.pages.get(url) else {
            return Err(FetchError::new(FailureKind::HttpStatus(403), "forbidden"));
        };
        Ok(FetchOutput {
            html: html.clone(),
            metadata: FetchMetadata {
                original_url: url.to_string(),
                final_url: url.to_string(),
                status: 200,
                redirect_count: 0,
                content_type: Some("text/html".to_string()),
                encoding: "UTF-8".to_string(),
                byte_len: html.len() as u64,
            },
        })
    }
}

fn article(words: usize, tag: &str) -> String {
    let body = (0..words)
        .map(|i| format!("{tag}{i}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("<html><body><article><p>{body}</p></article></body></html>")
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 1, hour, 0, 0).unwrap()
}

struct Harness {
    pipeline: Pipeline,
    store: Arc<MemoryStore>,
    clock: Arc<AtomicI64>,
    fetcher: Arc<SiteFetcher>,
}

fn harness(pages: &[(&str, String)], per_host_delay: Duration, sink: Option<ChannelProgressSink>) -> Harness {
    harness_with(SiteFetcher::new(pages), per_host_delay, sink)
}

fn harness_with(
    fetcher: Arc<SiteFetcher>,
    per_host_delay: Duration,
    sink: Option<ChannelProgressSink>,
) -> Harness {
    let clock = Arc::new(AtomicI64::new(at(8).timestamp()));
    let clock_source = clock.clone();
    let config = OrchestratorConfig {
        per_host_delay,
        workers: 2,
        strategy_chain: StrategyChain::new([Strategy::Basic]).unwrap(),
        clock: Arc::new(move || {
            Utc.timestamp_opt(clock_source.load(Ordering::SeqCst), 0)
                .single()
                .unwrap()
        }),
        ..OrchestratorConfig::default()
    };
    let orchestrator = StrategyOrchestrator::new(
        config,
        Transports::new().with(Strategy::Basic, fetcher.clone()),
        Arc::new(ArticleExtractor::new()),
    )
    .unwrap();
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = Pipeline::new(Arc::new(orchestrator), store.clone());
    if let Some(sink) = sink {
        pipeline = pipeline.with_sink(Arc::new(sink));
    }
    Harness {
        pipeline,
        store,
        clock,
        fetcher,
    }
}

fn batch() -> Vec<FeedItem> {
    vec![
        FeedItem::new("https://a.com/1", "summary a").with_source_feed("A"),
        FeedItem::new("https://www.a.com/1/", "summary a again").with_source_feed("A"),
        FeedItem::new("https://b.com/2", "summary b").with_source_feed("B"),
    ]
}

fn pages() -> Vec<(&'static str, String)> {
    vec![
        ("https://a.com/1", article(300, "first")),
        ("https://www.a.com/1/", article(250, "second")),
    ]
}

#[tokio::test]
async fn batch_is_extracted_reconciled_and_reported() {
    scrape_logging::initialize_for_tests();
    let (tx, rx) = mpsc::channel();
    let h = harness(&pages(), Duration::ZERO, Some(ChannelProgressSink::new(tx)));

    let report = h.pipeline.run(batch(), &CancellationToken::new()).await.unwrap();

    assert_eq!(report.total(), 3);
    assert_eq!(report.extracted(), 2);
    assert_eq!(report.degraded(), 1);
    assert_eq!(
        report.items.iter().map(|i| i.disposition).collect::<Vec<_>>(),
        vec![
            Disposition::Extracted(Strategy::Basic),
            Disposition::Extracted(Strategy::Basic),
            Disposition::Degraded,
        ]
    );
    assert_eq!(report.items[0].dedup_key, report.items[1].dedup_key);
    assert_eq!(report.writes_of(WriteKind::Insert), 3);
    assert_eq!(report.feeds["A"].extracted, 2);
    assert_eq!(report.feeds["B"].degraded, 1);
    assert_eq!(report.failure_reasons.get("blocked"), Some(&1));

    let rows = h.store.rows().unwrap();
    assert_eq!(rows.len(), 2);
    let a = rows.iter().find(|r| r.record.dedup_key == "a.com/1").unwrap();
    assert!(a.record.content.starts_with("second0"));
    let b = rows.iter().find(|r| r.record.dedup_key == "b.com/2").unwrap();
    assert_eq!(b.record.content, "summary b");
    assert!(b.record.degraded);

    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    let started = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::ItemStarted { .. }))
        .count();
    assert_eq!(started, 3);
    assert_eq!(
        events.last(),
        Some(&PipelineEvent::BatchApplied {
            inserted: 2,
            updated: 0,
            unchanged: 0
        })
    );
}

#[tokio::test]
async fn rerun_updates_in_place_and_keeps_created_at() {
    let h = harness(&pages(), Duration::ZERO, None);
    h.pipeline.run(batch(), &CancellationToken::new()).await.unwrap();
    let first: HashMap<String, _> = h
        .store
        .rows()
        .unwrap()
        .into_iter()
        .map(|row| (row.record.dedup_key.clone(), row))
        .collect();

    h.clock.store(at(10).timestamp(), Ordering::SeqCst);
    let report = h.pipeline.run(batch(), &CancellationToken::new()).await.unwrap();

    assert_eq!(report.writes_of(WriteKind::Unchanged), 3);
    let rows = h.store.rows().unwrap();
    assert_eq!(rows.len(), 2);
    for row in rows {
        let before = &first[&row.record.dedup_key];
        assert_eq!(row.row_id, before.row_id);
        assert_eq!(row.record.created_at, at(8));
        assert_eq!(row.record.updated_at, at(10));
    }
}

#[tokio::test]
async fn cancelled_batch_is_reported_but_not_written() {
    let h = harness(&pages(), Duration::ZERO, None);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h.pipeline.run(batch(), &cancel).await.unwrap();

    assert_eq!(report.total(), 3);
    assert_eq!(report.interrupted(), 3);
    assert_eq!(report.writes_of(WriteKind::Skipped), 3);
    assert!(h.store.rows().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn same_host_items_are_paced() {
    let pages = vec![
        ("https://a.com/x", article(300, "x")),
        ("https://a.com/y", article(300, "y")),
    ];
    let h = harness(&pages, Duration::from_secs(2), None);
    let items = vec![
        FeedItem::new("https://a.com/x", "S"),
        FeedItem::new("https://a.com/y", "S"),
    ];

    h.pipeline.run(items, &CancellationToken::new()).await.unwrap();

    let mut times = h.fetcher.call_times();
    times.sort();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn cancelling_mid_run_keeps_finished_items_and_skips_the_rest() {
    let fetcher = SiteFetcher::with_hanging(
        &[("https://a.com/1", article(300, "done"))],
        &["https://b.com/2"],
    );
    let h = harness_with(fetcher, Duration::ZERO, None);
    let items = vec![
        FeedItem::new("https://a.com/1", "summary a"),
        FeedItem::new("https://b.com/2", "summary b"),
    ];
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });
    let begun = Instant::now();

    let report = h.pipeline.run(items, &cancel).await.unwrap();

    assert!(begun.elapsed() < scrape_engine::DEFAULT_PER_FETCH_TIMEOUT);
    assert_eq!(
        report
            .items
            .iter()
            .map(|i| (i.disposition, i.write))
            .collect::<Vec<_>>(),
        vec![
            (Disposition::Extracted(Strategy::Basic), WriteKind::Insert),
            (Disposition::Interrupted, WriteKind::Skipped),
        ]
    );
    let rows = h.store.rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.dedup_key, "a.com/1");
}
