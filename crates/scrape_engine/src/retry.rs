use std::time::Duration;

use scrape_core::Strategy;
use scrape_logging::scrape_debug;
use tokio_util::sync::CancellationToken;

use crate::fetch::Fetcher;
use crate::pacing::HostPacer;
use crate::{FailureKind, FetchError, FetchOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra tries after the first, only for transient failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further one.
    pub backoff: Duration,
    /// Upper bound for each individual try.
    pub per_fetch_timeout: Duration,
}

impl RetryPolicy {
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.backoff.saturating_mul(factor)
    }
}

/// One strategy's fetch, with bounded retries and a timeout on every try.
///
/// Every try, retries included, first takes a slot from `pacer` for `host`, so
/// a retry waits for whichever is later: its backoff or the host's next slot.
/// Only timeouts, network errors and 5xx responses are retried; an anti-bot
/// refusal is returned immediately so the caller can escalate.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    url: &str,
    strategy: Strategy,
    policy: &RetryPolicy,
    pacer: &HostPacer,
    host: Option<&str>,
    cancel: &CancellationToken,
) -> Result<FetchOutput, FetchError> {
    let mut retry = 0;
    loop {
        if let Some(host) = host {
            if pacer.acquire(host, cancel).await.is_err() {
                return Err(cancelled());
            }
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            outcome = tokio::time::timeout(policy.per_fetch_timeout, fetcher.fetch(url, strategy)) => {
                outcome.unwrap_or_else(|_| {
                    Err(FetchError::new(
                        FailureKind::Timeout,
                        format!("no response within {:?}", policy.per_fetch_timeout),
                    ))
                })
            }
        };

        match result {
            Ok(output) => return Ok(output),
            Err(err) if err.is_transient() && retry < policy.max_retries => {
                let delay = policy.backoff_for(retry);
                scrape_debug!(
                    "retry {}/{} for {} via {} in {:?}: {}",
                    retry + 1,
                    policy.max_retries,
                    url,
                    strategy,
                    delay,
                    err
                );
                retry += 1;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn cancelled() -> FetchError {
    FetchError::new(FailureKind::Cancelled, "run cancelled")
}
