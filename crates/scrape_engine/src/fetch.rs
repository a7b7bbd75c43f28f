use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, DNT, REFERER,
    UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use scrape_core::Strategy;

use crate::decode::decode_html;
use crate::{FailureKind, FetchError, FetchMetadata, FetchOutput};

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
];

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub user_agents: Vec<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
        }
    }
}

/// One network round trip (or one rendered page) for a URL.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, strategy: Strategy) -> Result<FetchOutput, FetchError>;
}

/// Request headers an HTTP transport presents to the target site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    /// Fixed browser user agent and a plain Accept header.
    Plain,
    /// User agent rotated per request plus a same-origin referer.
    Rotating,
    /// Complete navigation header set of a desktop browser, cookies kept.
    BrowserLike,
}

impl HeaderProfile {
    pub fn for_strategy(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Basic => HeaderProfile::Plain,
            Strategy::Enhanced => HeaderProfile::Rotating,
            Strategy::Bypass | Strategy::Browser => HeaderProfile::BrowserLike,
        }
    }
}

pub struct ReqwestFetcher {
    settings: FetchSettings,
    profile: HeaderProfile,
    rotation: AtomicUsize,
    cookies: Option<Arc<reqwest::cookie::Jar>>,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings, profile: HeaderProfile) -> Self {
        let cookies = (profile == HeaderProfile::BrowserLike)
            .then(|| Arc::new(reqwest::cookie::Jar::default()));
        Self {
            settings,
            profile,
            rotation: AtomicUsize::new(0),
            cookies,
        }
    }

    fn build_client(&self, redirect_counter: Arc<AtomicUsize>) -> Result<reqwest::Client, FetchError> {
        let redirect_limit = self.settings.redirect_limit;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            let count = attempt.previous().len();
            redirect_counter.store(count, Ordering::Relaxed);
            if count >= redirect_limit {
                attempt.error("redirect limit exceeded")
            } else {
                attempt.follow()
            }
        });

        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .redirect(policy);
        if let Some(jar) = &self.cookies {
            builder = builder.cookie_provider(jar.clone());
        }
        builder
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
    }

    fn user_agent(&self) -> &str {
        let agents = &self.settings.user_agents;
        if agents.is_empty() {
            return DEFAULT_USER_AGENTS[0];
        }
        match self.profile {
            HeaderProfile::Plain => &agents[0],
            HeaderProfile::Rotating | HeaderProfile::BrowserLike => {
                let next = self.rotation.fetch_add(1, Ordering::Relaxed);
                &agents[next % agents.len()]
            }
        }
    }

    fn headers_for(&self, url: &reqwest::Url) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(self.user_agent()) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        if self.profile != HeaderProfile::Plain {
            let origin = url.origin();
            if origin.is_tuple() {
                let referer = format!("{}/", origin.ascii_serialization());
                if let Ok(value) = HeaderValue::from_str(&referer) {
                    headers.insert(REFERER, value);
                }
            }
        }

        if self.profile == HeaderProfile::BrowserLike {
            headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
            headers.insert(DNT, HeaderValue::from_static("1"));
            for (name, value) in [
                ("sec-fetch-dest", "document"),
                ("sec-fetch-mode", "navigate"),
                ("sec-fetch-site", "same-origin"),
                ("sec-fetch-user", "?1"),
            ] {
                headers.insert(name, HeaderValue::from_static(value));
            }
        }
        headers
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ct))
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, _strategy: Strategy) -> Result<FetchOutput, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let redirect_counter = Arc::new(AtomicUsize::new(0));
        let client = self.build_client(redirect_counter.clone())?;

        let response = client
            .get(parsed.clone())
            .headers(self.headers_for(&parsed))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct) {
                return Err(FetchError::new(
                    FailureKind::UnsupportedContentType {
                        content_type: ct.to_string(),
                    },
                    "unsupported content type",
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let decoded = decode_html(&bytes, content_type.as_deref())
            .map_err(|err| FetchError::new(FailureKind::Decode, err.to_string()))?;

        Ok(FetchOutput {
            html: decoded.html,
            metadata: FetchMetadata {
                original_url: url.to_string(),
                final_url,
                status: status.as_u16(),
                redirect_count: redirect_counter.load(Ordering::Relaxed),
                content_type,
                encoding: decoded.encoding_label,
                byte_len: bytes.len() as u64,
            },
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

/// Which transport serves which strategy.
#[derive(Clone, Default)]
pub struct Transports {
    fetchers: HashMap<Strategy, Arc<dyn Fetcher>>,
}

impl Transports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, strategy: Strategy, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.insert(strategy, fetcher);
        self
    }

    pub fn get(&self, strategy: Strategy) -> Option<Arc<dyn Fetcher>> {
        self.fetchers.get(&strategy).cloned()
    }

    pub fn supports(&self, strategy: Strategy) -> bool {
        self.fetchers.contains_key(&strategy)
    }

    /// HTTP transports for the three header profiles, optionally a browser.
    pub fn http(settings: &FetchSettings, browser: Option<Arc<dyn Fetcher>>) -> Self {
        let mut transports = Self::new();
        for strategy in [Strategy::Basic, Strategy::Enhanced, Strategy::Bypass] {
            let fetcher = ReqwestFetcher::new(settings.clone(), HeaderProfile::for_strategy(strategy));
            transports = transports.with(strategy, Arc::new(fetcher));
        }
        if let Some(browser) = browser {
            transports = transports.with(Strategy::Browser, browser);
        }
        transports
    }
}
