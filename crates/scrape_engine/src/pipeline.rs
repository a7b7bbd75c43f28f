use std::sync::mpsc;
use std::sync::Arc;

use futures_util::{stream, StreamExt};
use scrape_core::{
    build_record, normalize_url_for_dedupe, reconcile, Disposition, ExtractionResult, FeedItem,
    ItemReport, RunReport, StrategyChain, WriteKind,
};
use scrape_logging::{scrape_error, scrape_info};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigError;
use crate::orchestrator::StrategyOrchestrator;
use crate::store::{RecordStore, StoreError};
use crate::PipelineEvent;

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: PipelineEvent) {}
}

pub struct ChannelProgressSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

/// Extract, reconcile and persist one batch of feed items.
pub struct Pipeline {
    orchestrator: Arc<StrategyOrchestrator>,
    store: Arc<dyn RecordStore>,
    sink: Arc<dyn ProgressSink>,
    chain: StrategyChain,
}

impl Pipeline {
    pub fn new(orchestrator: Arc<StrategyOrchestrator>, store: Arc<dyn RecordStore>) -> Self {
        let chain = orchestrator.config().strategy_chain.clone();
        Self {
            orchestrator,
            store,
            sink: Arc::new(NullProgressSink),
            chain,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Narrows or replaces the configured chain for this pipeline's runs.
    pub fn with_chain(mut self, chain: StrategyChain) -> Result<Self, ConfigError> {
        self.orchestrator.check_chain(&chain)?;
        self.chain = chain;
        Ok(self)
    }

    /// Runs the batch to completion. Every input item appears in the report, in
    /// input order; cancelled items are reported as interrupted and not written.
    pub async fn run(
        &self,
        items: Vec<FeedItem>,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let config = self.orchestrator.config();
        let started_at = config.now();
        let workers = config.workers.max(1);

        let orchestrator = self.orchestrator.as_ref();
        let sink = self.sink.as_ref();
        let chain = &self.chain;
        let results: Vec<(FeedItem, ExtractionResult)> = stream::iter(items.into_iter().enumerate())
            .map(move |(index, item)| async move {
                sink.emit(PipelineEvent::ItemStarted {
                    index,
                    url: item.url.clone(),
                });
                let result = orchestrator.run_chain(&item, chain, cancel).await;
                for attempt in &result.attempts {
                    sink.emit(PipelineEvent::AttemptFinished {
                        url: item.url.clone(),
                        strategy: attempt.strategy,
                        outcome: attempt.outcome,
                    });
                }
                sink.emit(PipelineEvent::ItemFinished {
                    index,
                    url: item.url.clone(),
                    disposition: Disposition::of(&result),
                });
                (item, result)
            })
            .buffered(workers)
            .collect()
            .await;

        let now = config.now();
        let records = results
            .iter()
            .filter(|(_, result)| !result.interrupted)
            .map(|(item, result)| build_record(item, result, now));

        let index = self.store.lookup_index().inspect_err(|err| {
            scrape_error!("reading store index failed: {}", err);
        })?;
        let plan = reconcile(records, &index, now);
        if !plan.is_empty() {
            let applied = self.store.apply(&plan).inspect_err(|err| {
                scrape_error!("writing {} records failed: {}", plan.len(), err);
            })?;
            scrape_info!(
                "stored batch: {} inserted, {} updated, {} unchanged",
                applied.inserted,
                applied.updated,
                applied.unchanged
            );
        }
        sink.emit(PipelineEvent::batch_applied(&plan));

        let kinds = plan.kinds_by_key();
        let reports = results
            .iter()
            .map(|(item, result)| {
                let key = normalize_url_for_dedupe(&item.url);
                let write = if result.interrupted {
                    WriteKind::Skipped
                } else {
                    kinds.get(key.as_str()).copied().unwrap_or(WriteKind::Skipped)
                };
                ItemReport::new(&item.url, &key, &item.source_feed, result, write)
            })
            .collect();

        let report = RunReport::from_items(reports, started_at, config.now());
        log_summary(&report);
        Ok(report)
    }
}

fn log_summary(report: &RunReport) {
    scrape_info!(
        "run finished: {} items, {} extracted ({:.1}%), {} degraded, {} interrupted",
        report.total(),
        report.extracted(),
        report.success_rate(),
        report.degraded(),
        report.interrupted()
    );
    for (reason, count) in &report.failure_reasons {
        scrape_info!("  {}: {}", reason, count);
    }
}
