//! Scrape engine: transports, extraction, escalation and persistence.
mod browser;
mod config;
mod decode;
mod extract;
mod feed;
mod fetch;
mod orchestrator;
mod pacing;
mod persist;
mod pipeline;
mod retry;
mod store;
mod text;
mod types;

pub use browser::{BrowserSettings, CommandBrowserFetcher};
pub use config::{
    Clock, ConfigError, OrchestratorConfig, DEFAULT_ACCEPT_THRESHOLD, DEFAULT_MAX_RETRIES,
    DEFAULT_PER_FETCH_TIMEOUT, DEFAULT_PER_HOST_DELAY, DEFAULT_RETRY_BACKOFF, DEFAULT_WORKERS,
};
pub use decode::{decode_html, DecodeError, DecodedHtml};
pub use extract::{
    looks_like_challenge, quality_score, ArticleExtractor, Extractor, ParseError, ParsedDocument,
};
pub use feed::{parse_feed, FeedConfig, FeedError, FeedSource, RssFeedSource, DEFAULT_ITEM_LIMIT};
pub use fetch::{FetchSettings, Fetcher, HeaderProfile, ReqwestFetcher, Transports};
pub use orchestrator::StrategyOrchestrator;
pub use pacing::{HostPacer, PacingCancelled};
pub use persist::{ensure_output_dir, write_json, AtomicFileWriter, PersistError};
pub use pipeline::{
    ChannelProgressSink, NullProgressSink, Pipeline, PipelineError, ProgressSink,
};
pub use retry::{fetch_with_retry, RetryPolicy};
pub use store::{ApplySummary, JsonFileStore, MemoryStore, RecordStore, StoreError, StoredRow};
pub use types::{FailureKind, FetchError, FetchMetadata, FetchOutput, PipelineEvent};
