use std::io::ErrorKind;
use std::process::Stdio;

use scrape_core::Strategy;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::decode::decode_html;
use crate::fetch::Fetcher;
use crate::{FailureKind, FetchError, FetchMetadata, FetchOutput};

const URL_PLACEHOLDER: &str = "{url}";
const READ_CHUNK: usize = 8 * 1024;
/// Stderr kept for error messages; the rest is drained and dropped.
const STDERR_KEEP: usize = 4 * 1024;

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Program and arguments; `{url}` is substituted, otherwise the URL is appended.
    pub command: Vec<String>,
    pub max_bytes: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            command: ["chromium", "--headless", "--disable-gpu", "--dump-dom", URL_PLACEHOLDER]
                .iter()
                .map(|part| part.to_string())
                .collect(),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Renders pages with an external headless browser and reads the DOM from stdout.
///
/// The child is killed when the fetch future is dropped, so per-fetch timeouts
/// and cancellation do not leave browsers running.
#[derive(Debug, Clone)]
pub struct CommandBrowserFetcher {
    settings: BrowserSettings,
}

impl CommandBrowserFetcher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn command_for(&self, url: &str) -> Result<Command, FetchError> {
        let (program, args) = self.settings.command.split_first().ok_or_else(|| {
            FetchError::new(FailureKind::TransportUnavailable, "browser command is empty")
        })?;

        let mut substituted = false;
        let mut args: Vec<String> = args
            .iter()
            .map(|arg| {
                if arg.contains(URL_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(URL_PLACEHOLDER, url)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(url.to_string());
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(command)
    }
}

#[async_trait::async_trait]
impl Fetcher for CommandBrowserFetcher {
    async fn fetch(&self, url: &str, _strategy: Strategy) -> Result<FetchOutput, FetchError> {
        // Only hand well-formed web URLs to the child process.
        let parsed = url::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::new(
                FailureKind::InvalidUrl,
                format!("unsupported scheme {}", parsed.scheme()),
            ));
        }

        let mut child = self
            .command_for(parsed.as_str())?
            .spawn()
            .map_err(|err| {
                let kind = if err.kind() == ErrorKind::NotFound {
                    FailureKind::TransportUnavailable
                } else {
                    FailureKind::Network
                };
                FetchError::new(kind, err.to_string())
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::new(FailureKind::Network, "browser stdout not captured"))?;
        // Drained concurrently so a chatty browser never blocks on a full stderr pipe.
        let stderr = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_head(stderr, STDERR_KEEP)));

        let max_bytes = self.settings.max_bytes;
        let body = match read_capped(stdout, max_bytes).await {
            Ok(Capped::Complete(body)) => body,
            Ok(Capped::Exceeded(seen)) => {
                // Best effort; kill_on_drop covers a child that ignores this.
                let _ = child.start_kill();
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(seen),
                    },
                    "rendered page too large",
                ));
            }
            Err(err) => return Err(FetchError::new(FailureKind::Network, err.to_string())),
        };

        let status = child
            .wait()
            .await
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        if !status.success() {
            let head = match stderr {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };
            let stderr = String::from_utf8_lossy(&head);
            let snippet: String = stderr.chars().take(200).collect();
            return Err(FetchError::new(
                FailureKind::Network,
                format!("browser exited with {}: {}", status, snippet.trim()),
            ));
        }

        let byte_len = body.len() as u64;
        let decoded = decode_html(&body, None)
            .map_err(|err| FetchError::new(FailureKind::Decode, err.to_string()))?;

        Ok(FetchOutput {
            html: decoded.html,
            metadata: FetchMetadata {
                original_url: url.to_string(),
                final_url: parsed.to_string(),
                status: 200,
                redirect_count: 0,
                content_type: Some("text/html".to_string()),
                encoding: decoded.encoding_label,
                byte_len,
            },
        })
    }
}

enum Capped {
    Complete(Vec<u8>),
    /// Bytes read when the limit was crossed; the stream may hold more.
    Exceeded(u64),
}

/// Reads `reader` to the end, giving up as soon as more than `max_bytes` arrive.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, max_bytes: u64) -> std::io::Result<Capped> {
    let mut body = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Ok(Capped::Complete(body));
        }
        let seen = body.len() as u64 + read as u64;
        if seen > max_bytes {
            return Ok(Capped::Exceeded(seen));
        }
        body.extend_from_slice(&chunk[..read]);
    }
}

/// Drains `reader`, keeping at most the first `keep` bytes.
async fn read_head<R: AsyncRead + Unpin>(mut reader: R, keep: usize) -> Vec<u8> {
    let mut head = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    while let Ok(read) = reader.read(&mut chunk).await {
        if read == 0 {
            break;
        }
        let room = keep.saturating_sub(head.len());
        head.extend_from_slice(&chunk[..read.min(room)]);
    }
    head
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn fetcher(command: &[&str]) -> CommandBrowserFetcher {
        CommandBrowserFetcher::new(BrowserSettings {
            command: command.iter().map(|s| s.to_string()).collect(),
            ..BrowserSettings::default()
        })
    }

    #[tokio::test]
    async fn stdout_of_the_command_is_the_page() {
        let fetcher = fetcher(&["sh", "-c", "printf '<p>%s</p>' \"$0\"", "{url}"]);
        let output = fetcher
            .fetch("https://example.com/a", Strategy::Browser)
            .await
            .unwrap();
        assert_eq!(output.html, "<p>https://example.com/a</p>");
        assert_eq!(output.metadata.status, 200);
    }

    #[tokio::test]
    async fn missing_program_is_reported_as_unavailable() {
        let fetcher = fetcher(&["definitely-not-a-browser-binary"]);
        let err = fetcher
            .fetch("https://example.com/a", Strategy::Browser)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::TransportUnavailable);
    }

    #[tokio::test]
    async fn endless_output_is_cut_off_at_the_limit() {
        let fetcher = CommandBrowserFetcher::new(BrowserSettings {
            command: vec!["yes".to_string(), "{url}".to_string()],
            max_bytes: 1000,
        });
        let err = fetcher
            .fetch("https://example.com/a", Strategy::Browser)
            .await
            .unwrap_err();
        match err.kind {
            FailureKind::TooLarge { max_bytes, actual } => {
                assert_eq!(max_bytes, 1000);
                assert!(actual.is_some_and(|seen| seen > 1000));
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_browser_reports_its_stderr() {
        let fetcher = fetcher(&["sh", "-c", "echo 'no display' >&2; exit 3", "{url}"]);
        let err = fetcher
            .fetch("https://example.com/a", Strategy::Browser)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Network);
        assert!(err.message.contains("no display"), "{}", err.message);
    }

    #[tokio::test]
    async fn non_web_urls_are_refused() {
        let fetcher = fetcher(&["cat"]);
        let err = fetcher
            .fetch("file:///etc/passwd", Strategy::Browser)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidUrl);
    }
}
