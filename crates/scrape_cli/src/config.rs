use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use scrape_core::{Strategy, StrategyChain};
use scrape_engine::{
    BrowserSettings, ConfigError, FeedConfig, FetchSettings, OrchestratorConfig,
    DEFAULT_ACCEPT_THRESHOLD, DEFAULT_MAX_RETRIES, DEFAULT_PER_FETCH_TIMEOUT,
    DEFAULT_PER_HOST_DELAY, DEFAULT_RETRY_BACKOFF, DEFAULT_WORKERS,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "scrape.ron";
const DEFAULT_STORE_PATH: &str = "articles.json";

/// Settings file contents; every field may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feeds: Vec<FeedConfig>,
    pub strategies: Vec<Strategy>,
    pub accept_threshold: f64,
    pub per_host_delay_ms: u64,
    pub per_fetch_timeout_ms: u64,
    pub max_retries_per_strategy: u32,
    pub retry_backoff_ms: u64,
    pub workers: usize,
    pub store_path: PathBuf,
    pub browser_command: Vec<String>,
    pub log_level: String,
    /// File the settings were read from; `None` when running on defaults.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feeds: vec![
                FeedConfig::new("FreightWaves", "https://www.freightwaves.com/feed"),
                FeedConfig::new("FreightCaviar", "https://www.freightcaviar.com/latest/rss"),
            ],
            strategies: Strategy::ALL.to_vec(),
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
            per_host_delay_ms: millis(DEFAULT_PER_HOST_DELAY),
            per_fetch_timeout_ms: millis(DEFAULT_PER_FETCH_TIMEOUT),
            max_retries_per_strategy: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: millis(DEFAULT_RETRY_BACKOFF),
            workers: DEFAULT_WORKERS,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            browser_command: BrowserSettings::default().command,
            log_level: "info".to_string(),
            source: None,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl AppConfig {
    /// Reads `path`, or `scrape.ron` in the working directory when no path is given.
    ///
    /// An explicitly named file must exist; the implicit one falls back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        let content = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading config {}", path.display()));
            }
        };
        let mut config: AppConfig = ron::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.source = Some(path);
        Ok(config)
    }

    pub fn chain(&self) -> Result<StrategyChain, ConfigError> {
        Ok(StrategyChain::new(self.strategies.iter().copied())?)
    }

    /// Validated orchestrator settings; `chain` replaces the configured strategies.
    pub fn orchestrator_config(&self, chain: Option<StrategyChain>) -> Result<OrchestratorConfig, ConfigError> {
        let strategy_chain = match chain {
            Some(chain) => chain,
            None => self.chain()?,
        };
        let config = OrchestratorConfig {
            accept_threshold: self.accept_threshold,
            per_host_delay: Duration::from_millis(self.per_host_delay_ms),
            per_fetch_timeout: Duration::from_millis(self.per_fetch_timeout_ms),
            strategy_chain,
            max_retries_per_strategy: self.max_retries_per_strategy,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            workers: self.workers,
            ..OrchestratorConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            request_timeout: Duration::from_millis(self.per_fetch_timeout_ms),
            ..FetchSettings::default()
        }
    }

    pub fn browser_settings(&self) -> Option<BrowserSettings> {
        if self.browser_command.is_empty() {
            return None;
        }
        Some(BrowserSettings {
            command: self.browser_command.clone(),
            ..BrowserSettings::default()
        })
    }

    pub fn enabled_feeds<'a>(&'a self, only: Option<&'a str>) -> impl Iterator<Item = &'a FeedConfig> {
        self.feeds.iter().filter(move |feed| {
            feed.enabled && only.is_none_or(|name| feed.name.eq_ignore_ascii_case(name))
        })
    }
}
