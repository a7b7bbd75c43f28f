use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use scrape_core::{Disposition, FeedItem, RunReport, Strategy, StrategyChain};
use scrape_engine::{
    write_json, ArticleExtractor, CommandBrowserFetcher, Fetcher, FeedSource, JsonFileStore,
    Pipeline, RecordStore, RssFeedSource, StrategyOrchestrator, Transports,
};
use scrape_logging::{scrape_info, scrape_warn};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;

pub struct RunArgs {
    pub limit: Option<usize>,
    pub feed: Option<String>,
    pub strategies: Option<String>,
    pub store: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

fn parse_chain(raw: Option<&str>) -> anyhow::Result<Option<StrategyChain>> {
    raw.map(StrategyChain::parse_list)
        .transpose()
        .context("invalid --strategies")
}

fn build_orchestrator(
    config: &AppConfig,
    chain: Option<StrategyChain>,
) -> anyhow::Result<StrategyOrchestrator> {
    let orchestrator_config = config.orchestrator_config(chain)?;
    let browser: Option<Arc<dyn Fetcher>> = if orchestrator_config
        .strategy_chain
        .iter()
        .any(|strategy| strategy == Strategy::Browser)
    {
        config
            .browser_settings()
            .map(|settings| Arc::new(CommandBrowserFetcher::new(settings)) as Arc<dyn Fetcher>)
    } else {
        None
    };
    let transports = Transports::http(&config.fetch_settings(), browser);
    let orchestrator = StrategyOrchestrator::new(
        orchestrator_config,
        transports,
        Arc::new(ArticleExtractor::new()),
    )?;
    Ok(orchestrator)
}

pub async fn run(config: &AppConfig, args: RunArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, parse_chain(args.strategies.as_deref())?)?;

    let feeds: Vec<_> = config.enabled_feeds(args.feed.as_deref()).cloned().collect();
    if feeds.is_empty() {
        bail!("no enabled feed matches {:?}", args.feed.as_deref().unwrap_or("*"));
    }

    let source = RssFeedSource::new(Duration::from_millis(config.per_fetch_timeout_ms))?;
    let mut items: Vec<FeedItem> = Vec::new();
    for mut feed in feeds {
        if let Some(limit) = args.limit {
            feed.item_limit = limit;
        }
        match source.fetch_items(&feed).await {
            Ok(found) => {
                scrape_info!("{}: {} items", feed.name, found.len());
                items.extend(found);
            }
            Err(err) => scrape_warn!("skipping feed {}: {}", feed.name, err),
        }
    }

    let store_path = args.store.unwrap_or_else(|| config.store_path.clone());
    let store = Arc::new(JsonFileStore::new(store_path.clone()));
    let pipeline = Pipeline::new(Arc::new(orchestrator), store);
    let report = pipeline
        .run(items, cancel)
        .await
        .with_context(|| format!("updating store {}", store_path.display()))?;

    print_report(&report);
    if let Some(path) = args.report {
        let written = write_json(&path, &report)
            .with_context(|| format!("writing report {}", path.display()))?;
        println!("report written to {}", written.display());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    for item in &report.items {
        let disposition = match item.disposition {
            Disposition::Extracted(strategy) => format!("extracted via {strategy}"),
            Disposition::Degraded => "degraded".to_string(),
            Disposition::Interrupted => "interrupted".to_string(),
        };
        let write = format!("{:?}", item.write).to_lowercase();
        println!("{:<24} {:<10} {}", disposition, write, item.url);
    }
    println!(
        "{} items: {} extracted ({:.1}%), {} degraded, {} interrupted",
        report.total(),
        report.extracted(),
        report.success_rate(),
        report.degraded(),
        report.interrupted()
    );
    for (reason, count) in &report.failure_reasons {
        println!("  {reason}: {count}");
    }
}

pub async fn extract(
    config: &AppConfig,
    url: String,
    summary: String,
    strategies: Option<String>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, parse_chain(strategies.as_deref())?)?;
    let item = FeedItem::new(url, summary);
    let result = orchestrator.extract(&item, cancel).await;

    for attempt in &result.attempts {
        println!("{:<9} {:<14} {}", attempt.strategy, attempt.outcome, attempt.detail);
    }
    match result.final_strategy_used {
        Some(strategy) => println!("-- accepted via {strategy} ({} words)", result.word_count()),
        None if result.interrupted => println!("-- interrupted"),
        None => println!("-- degraded ({} words)", result.word_count()),
    }
    if let Some(metadata) = &result.metadata {
        if let Some(title) = &metadata.title {
            println!("title: {title}");
        }
        if let Some(author) = &metadata.author {
            println!("author: {author}");
        }
    }
    println!();
    println!("{}", result.final_content);
    Ok(())
}

pub fn stats(config: &AppConfig, store: Option<PathBuf>) -> anyhow::Result<()> {
    let path = store.unwrap_or_else(|| config.store_path.clone());
    let rows = JsonFileStore::new(path.clone())
        .rows()
        .with_context(|| format!("reading store {}", path.display()))?;

    let mut per_feed: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    let mut per_strategy: BTreeMap<String, usize> = BTreeMap::new();
    for row in &rows {
        let entry = per_feed.entry(row.record.source_feed.as_str()).or_default();
        entry.0 += 1;
        if row.record.degraded {
            entry.1 += 1;
        }
        let strategy = row
            .record
            .strategy_used
            .map_or("summary", Strategy::name)
            .to_string();
        *per_strategy.entry(strategy).or_default() += 1;
    }

    let degraded = rows.iter().filter(|row| row.record.degraded).count();
    println!("{} rows in {} ({} degraded)", rows.len(), path.display(), degraded);
    for (feed, (total, degraded)) in &per_feed {
        let name = if feed.is_empty() { "(no feed)" } else { feed };
        println!("  {name}: {total} rows, {degraded} degraded");
    }
    for (strategy, count) in &per_strategy {
        println!("  via {strategy}: {count}");
    }
    Ok(())
}
