use std::sync::Arc;

use scrape_core::{
    request_host, AttemptOutcome, ExtractionAttempt, ExtractionResult, FeedItem, Strategy,
    StrategyChain,
};
use scrape_logging::{scrape_debug, scrape_info, scrape_warn};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, OrchestratorConfig};
use crate::extract::{looks_like_challenge, Extractor, ParsedDocument};
use crate::fetch::Transports;
use crate::pacing::HostPacer;
use crate::retry::{fetch_with_retry, RetryPolicy};
use crate::FailureKind;

enum Step {
    Finished {
        attempt: ExtractionAttempt,
        document: Option<ParsedDocument>,
    },
    Cancelled,
}

/// Runs the escalation chain for one item at a time; safe to share between workers.
pub struct StrategyOrchestrator {
    config: OrchestratorConfig,
    transports: Transports,
    extractor: Arc<dyn Extractor>,
    pacer: HostPacer,
    policy: RetryPolicy,
}

impl StrategyOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        transports: Transports,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        OrchestratorConfig::check_transports(&config.strategy_chain, &transports)?;
        let pacer = HostPacer::new(config.per_host_delay);
        let policy = config.retry_policy();
        Ok(Self {
            config,
            transports,
            extractor,
            pacer,
            policy,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Extracts `item` with the configured chain.
    pub async fn extract(&self, item: &FeedItem, cancel: &CancellationToken) -> ExtractionResult {
        self.run_chain(item, &self.config.strategy_chain, cancel).await
    }

    /// Extracts `item` with an explicit chain, e.g. a narrower one from the command line.
    pub async fn extract_with_chain(
        &self,
        item: &FeedItem,
        chain: &StrategyChain,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ConfigError> {
        self.check_chain(chain)?;
        Ok(self.run_chain(item, chain, cancel).await)
    }

    pub fn check_chain(&self, chain: &StrategyChain) -> Result<(), ConfigError> {
        OrchestratorConfig::check_transports(chain, &self.transports)
    }

    pub(crate) async fn run_chain(
        &self,
        item: &FeedItem,
        chain: &StrategyChain,
        cancel: &CancellationToken,
    ) -> ExtractionResult {
        let url = request_url(&item.url);
        let host = request_host(&url);
        let mut attempts: Vec<ExtractionAttempt> = Vec::with_capacity(chain.len());
        let mut interrupted = false;

        for strategy in chain.iter() {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            match self.attempt(&url, host.as_deref(), strategy, cancel).await {
                Step::Cancelled => {
                    scrape_debug!("{} via {} cancelled", item.url, strategy);
                    interrupted = true;
                    break;
                }
                Step::Finished { attempt, document } => {
                    scrape_debug!(
                        "{} via {}: {} ({})",
                        item.url,
                        strategy,
                        attempt.outcome,
                        attempt.detail
                    );
                    let accepted = attempt.outcome == AttemptOutcome::Success;
                    attempts.push(attempt);
                    if let (true, Some(document)) = (accepted, document) {
                        scrape_info!(
                            "accepted {} via {} ({} words, quality {:.1})",
                            item.url,
                            strategy,
                            document.word_count,
                            document.quality_score
                        );
                        return ExtractionResult {
                            final_strategy_used: Some(strategy),
                            attempts,
                            degraded: false,
                            interrupted: false,
                            metadata: Some(document.metadata()),
                            quality_score: Some(document.quality_score),
                            final_content: document.body,
                        };
                    }
                }
            }
        }

        degrade(item, attempts, interrupted)
    }

    async fn attempt(
        &self,
        url: &str,
        host: Option<&str>,
        strategy: Strategy,
        cancel: &CancellationToken,
    ) -> Step {
        let started_at = self.config.now();
        let finished = |outcome: AttemptOutcome, detail: String| Step::Finished {
            attempt: ExtractionAttempt {
                strategy,
                started_at,
                outcome,
                content: None,
                quality_score: None,
                detail,
            },
            document: None,
        };

        let Some(fetcher) = self.transports.get(strategy) else {
            return finished(
                AttemptOutcome::NetworkError,
                FailureKind::TransportUnavailable.to_string(),
            );
        };

        let fetched = fetch_with_retry(
            fetcher.as_ref(),
            url,
            strategy,
            &self.policy,
            &self.pacer,
            host,
            cancel,
        )
        .await;
        let output = match fetched {
            Ok(output) => output,
            Err(err) if err.kind == FailureKind::Cancelled => return Step::Cancelled,
            Err(err) => return finished(err.outcome(), err.to_string()),
        };

        if looks_like_challenge(&output.html) {
            return finished(AttemptOutcome::Blocked, "challenge page".to_string());
        }

        let document = match self.extractor.parse(&output.html) {
            Ok(document) => document,
            Err(err) => return finished(AttemptOutcome::ParseFailure, err.to_string()),
        };
        if document.body.trim().is_empty() {
            return finished(AttemptOutcome::ParseFailure, "empty body".to_string());
        }

        let threshold = self.config.accept_threshold;
        let (outcome, detail) = if document.quality_score >= threshold {
            (
                AttemptOutcome::Success,
                format!("{} words, quality {:.1}", document.word_count, document.quality_score),
            )
        } else {
            (
                AttemptOutcome::ParseFailure,
                format!(
                    "quality {:.1} below threshold {:.1}",
                    document.quality_score, threshold
                ),
            )
        };
        Step::Finished {
            attempt: ExtractionAttempt {
                strategy,
                started_at,
                outcome,
                content: Some(document.body.clone()),
                quality_score: Some(document.quality_score),
                detail,
            },
            document: Some(document),
        }
    }
}

/// Result for an item no strategy accepted: the feed summary, or failing that the
/// best below-threshold body seen.
fn degrade(item: &FeedItem, attempts: Vec<ExtractionAttempt>, interrupted: bool) -> ExtractionResult {
    let best_partial = attempts
        .iter()
        .filter_map(|attempt| Some((attempt.content.as_ref()?, attempt.quality_score?)))
        .filter(|(content, _)| !content.trim().is_empty())
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(content, score)| (content.clone(), score));

    let (final_content, quality_score) = match best_partial {
        Some((content, score)) if item.summary.trim().is_empty() => (content, Some(score)),
        _ => (item.summary.clone(), None),
    };

    if interrupted {
        scrape_debug!("{} interrupted after {} attempts", item.url, attempts.len());
    } else {
        scrape_warn!(
            "no strategy accepted {} after {} attempts; using {}",
            item.url,
            attempts.len(),
            if quality_score.is_some() { "best partial body" } else { "feed summary" }
        );
    }

    ExtractionResult {
        final_content,
        final_strategy_used: None,
        attempts,
        degraded: true,
        interrupted,
        metadata: None,
        quality_score,
    }
}

/// Feed links sometimes omit the scheme; requests go out over https then.
///
/// Anything that is not already an http(s) URL with a host gets the prefix, so
/// `a.com:8080/x` is not mistaken for a URL with scheme `a.com`.
fn request_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let is_web_url = url::Url::parse(trimmed)
        .is_ok_and(|url| url.has_host() && matches!(url.scheme(), "http" | "https"));
    if is_web_url {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}
