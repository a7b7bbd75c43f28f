use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scrape_core::{ChainError, Strategy, StrategyChain};

use crate::fetch::Transports;
use crate::retry::RetryPolicy;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 150.0;
pub const DEFAULT_PER_HOST_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_PER_FETCH_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_WORKERS: usize = 4;

/// Immutable settings shared by the orchestrator and the pipeline.
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Minimum quality score for an attempt to count as a success.
    pub accept_threshold: f64,
    pub per_host_delay: Duration,
    pub per_fetch_timeout: Duration,
    pub strategy_chain: StrategyChain,
    pub max_retries_per_strategy: u32,
    pub retry_backoff: Duration,
    /// Items extracted concurrently.
    pub workers: usize,
    pub clock: Clock,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
            per_host_delay: DEFAULT_PER_HOST_DELAY,
            per_fetch_timeout: DEFAULT_PER_FETCH_TIMEOUT,
            strategy_chain: StrategyChain::full(),
            max_retries_per_strategy: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            workers: DEFAULT_WORKERS,
            clock: Arc::new(Utc::now),
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("accept_threshold", &self.accept_threshold)
            .field("per_host_delay", &self.per_host_delay)
            .field("per_fetch_timeout", &self.per_fetch_timeout)
            .field("strategy_chain", &self.strategy_chain)
            .field("max_retries_per_strategy", &self.max_retries_per_strategy)
            .field("retry_backoff", &self.retry_backoff)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.accept_threshold.is_finite() || self.accept_threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(self.accept_threshold));
        }
        if self.per_fetch_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.strategy_chain.is_empty() {
            return Err(ConfigError::Chain(ChainError::Empty));
        }
        Ok(())
    }

    /// Every strategy in `chain` needs a transport before any work starts.
    pub fn check_transports(chain: &StrategyChain, transports: &Transports) -> Result<(), ConfigError> {
        match chain.iter().find(|strategy| !transports.supports(*strategy)) {
            Some(missing) => Err(ConfigError::MissingTransport(missing)),
            None => Ok(()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries_per_strategy,
            backoff: self.retry_backoff,
            per_fetch_timeout: self.per_fetch_timeout,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("accept threshold must be a positive number, got {0}")]
    InvalidThreshold(f64),
    #[error("per-fetch timeout must be greater than zero")]
    ZeroTimeout,
    #[error("worker count must be at least 1")]
    ZeroWorkers,
    #[error("no transport configured for strategy {0}")]
    MissingTransport(Strategy),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.accept_threshold, 150.0);
        assert_eq!(config.per_host_delay, Duration::from_secs(2));
        assert_eq!(config.retry_policy().per_fetch_timeout, Duration::from_secs(20));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = OrchestratorConfig {
            workers: 0,
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroWorkers));

        let config = OrchestratorConfig {
            accept_threshold: -1.0,
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidThreshold(-1.0)));
    }

    #[test]
    fn missing_transport_is_a_config_error() {
        let chain = StrategyChain::new([Strategy::Basic, Strategy::Browser]).unwrap();
        let transports = Transports::http(&crate::FetchSettings::default(), None);
        assert_eq!(
            OrchestratorConfig::check_transports(&chain, &transports),
            Err(ConfigError::MissingTransport(Strategy::Browser))
        );
    }
}
