use std::fmt;

use scrape_core::{AttemptOutcome, Disposition, Strategy, WritePlan};

/// Raw page as returned by a transport, already decoded to UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub html: String,
    pub metadata: FetchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub status: u16,
    pub redirect_count: usize,
    pub content_type: Option<String>,
    pub encoding: String,
    pub byte_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Worth another try at the fetch layer before giving up on this strategy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::Timeout | FailureKind::Network | FailureKind::HttpStatus(500..=599)
        ) && !self.is_blocked()
    }

    /// Anti-bot refusal rather than a broken site.
    pub fn is_blocked(&self) -> bool {
        matches!(self.kind, FailureKind::HttpStatus(403 | 429))
    }

    /// Maps a transport failure onto the attempt taxonomy.
    pub fn outcome(&self) -> AttemptOutcome {
        match self.kind {
            FailureKind::HttpStatus(403 | 429) => AttemptOutcome::Blocked,
            FailureKind::Timeout => AttemptOutcome::Timeout,
            FailureKind::Decode => AttemptOutcome::ParseFailure,
            _ => AttemptOutcome::NetworkError,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    Decode,
    TransportUnavailable,
    Cancelled,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::Decode => write!(f, "undecodable body"),
            FailureKind::TransportUnavailable => write!(f, "transport unavailable"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Progress notifications emitted while a batch runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    ItemStarted {
        index: usize,
        url: String,
    },
    AttemptFinished {
        url: String,
        strategy: Strategy,
        outcome: AttemptOutcome,
    },
    ItemFinished {
        index: usize,
        url: String,
        disposition: Disposition,
    },
    BatchApplied {
        inserted: usize,
        updated: usize,
        unchanged: usize,
    },
}

impl PipelineEvent {
    pub(crate) fn batch_applied(plan: &WritePlan) -> Self {
        let unchanged = plan
            .updates()
            .filter(|op| op.kind() == scrape_core::WriteKind::Unchanged)
            .count();
        PipelineEvent::BatchApplied {
            inserted: plan.inserts().count(),
            updated: plan.updates().count() - unchanged,
            unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anti_bot_statuses_map_to_blocked() {
        for code in [403, 429] {
            let err = FetchError::new(FailureKind::HttpStatus(code), "refused");
            assert_eq!(err.outcome(), AttemptOutcome::Blocked);
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn server_errors_and_timeouts_are_transient() {
        assert!(FetchError::new(FailureKind::HttpStatus(503), "busy").is_transient());
        assert!(FetchError::new(FailureKind::Timeout, "slow").is_transient());
        assert!(!FetchError::new(FailureKind::HttpStatus(404), "gone").is_transient());
        assert_eq!(
            FetchError::new(FailureKind::HttpStatus(404), "gone").outcome(),
            AttemptOutcome::NetworkError
        );
        assert_eq!(
            FetchError::new(FailureKind::Timeout, "slow").outcome(),
            AttemptOutcome::Timeout
        );
    }
}
