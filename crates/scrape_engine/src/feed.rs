use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::header::{HeaderValue, ACCEPT, USER_AGENT};
use scrape_core::FeedItem;
use scrape_logging::{scrape_debug, scrape_warn};
use scraper::Html;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const FEED_ACCEPT: &str = "application/rss+xml, application/atom+xml, application/xml, text/xml, */*";
const FEED_USER_AGENT: &str = "Mozilla/5.0 (compatible; scrape/0.1; +feed-reader)";
pub const DEFAULT_ITEM_LIMIT: usize = 5;

fn default_item_limit() -> usize {
    DEFAULT_ITEM_LIMIT
}

fn default_enabled() -> bool {
    true
}

/// One feed to poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_item_limit")]
    pub item_limit: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl FeedConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            item_limit: DEFAULT_ITEM_LIMIT,
            enabled: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Request(String),
    #[error("feed returned http status {0}")]
    Status(u16),
    #[error("malformed feed xml: {0}")]
    Xml(String),
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_items(&self, feed: &FeedConfig) -> Result<Vec<FeedItem>, FeedError>;
}

/// RSS 2.0 and Atom over HTTP.
pub struct RssFeedSource {
    client: reqwest::Client,
}

impl RssFeedSource {
    pub fn new(timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FeedError::Request(err.to_string()))?;
        Ok(Self { client })
    }

    async fn download(&self, url: &str) -> Result<Bytes, FeedError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, HeaderValue::from_static(FEED_USER_AGENT))
            .header(ACCEPT, HeaderValue::from_static(FEED_ACCEPT))
            .send()
            .await
            .map_err(|err| FeedError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }
        response
            .bytes()
            .await
            .map_err(|err| FeedError::Request(err.to_string()))
    }
}

#[async_trait::async_trait]
impl FeedSource for RssFeedSource {
    async fn fetch_items(&self, feed: &FeedConfig) -> Result<Vec<FeedItem>, FeedError> {
        let body = self.download(&feed.url).await?;
        let xml = String::from_utf8_lossy(&body);
        let items = parse_feed(&xml, &feed.name, feed.item_limit)?;
        scrape_debug!("feed {} yielded {} items", feed.name, items.len());
        Ok(items)
    }
}

#[derive(Default)]
struct Entry {
    link: Option<String>,
    title: String,
    summary: String,
    content: String,
    published: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Link,
    Title,
    Summary,
    Content,
    Published,
    Updated,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"link" | b"guid" => Some(Field::Link),
            b"title" => Some(Field::Title),
            b"description" | b"summary" => Some(Field::Summary),
            b"encoded" | b"content" => Some(Field::Content),
            b"pubDate" | b"published" | b"date" => Some(Field::Published),
            b"updated" => Some(Field::Updated),
            _ => None,
        }
    }
}

/// Items of an RSS `<item>` or Atom `<entry>` feed, in document order.
///
/// Links repeated within the feed are kept once; at most `limit` items are returned.
pub fn parse_feed(xml: &str, feed_name: &str, limit: usize) -> Result<Vec<FeedItem>, FeedError> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut items = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut entry: Option<Entry> = None;
    let mut field: Option<Field> = None;
    let mut guid_is_link = false;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"item" | b"entry" => entry = Some(Entry::default()),
                    tag if entry.is_some() => {
                        field = Field::from_tag(tag);
                        guid_is_link = tag == b"guid" && !guid_is_permalink_false(&e);
                        if tag == b"link" {
                            if let (Some(entry), Some(href)) = (entry.as_mut(), href_of(&e)) {
                                entry.link.get_or_insert(href);
                            }
                        }
                        text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"link" {
                    if let (Some(entry), Some(href)) = (entry.as_mut(), href_of(&e)) {
                        entry.link.get_or_insert(href);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if field.is_some() {
                    match e.unescape() {
                        Ok(value) => text.push_str(&value),
                        Err(err) => return Err(FeedError::Xml(err.to_string())),
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"item" | b"entry" => {
                        if let Some(done) = entry.take() {
                            if let Some(item) = finish_entry(done, feed_name) {
                                if seen.insert(item.url.clone()) {
                                    items.push(item);
                                }
                            }
                        }
                        if items.len() >= limit {
                            break;
                        }
                    }
                    tag => {
                        if let (Some(current), Some(entry)) = (field, entry.as_mut()) {
                            if Field::from_tag(tag) == Some(current) {
                                store_field(entry, current, guid_is_link, tag, text.trim());
                                field = None;
                                text.clear();
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(FeedError::Xml(err.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if items.is_empty() && !xml.contains("<item") && !xml.contains("<entry") {
        scrape_warn!("feed {} contains no items or entries", feed_name);
    }
    Ok(items)
}

fn store_field(entry: &mut Entry, field: Field, guid_is_link: bool, tag: &[u8], value: &str) {
    if value.is_empty() {
        return;
    }
    match field {
        Field::Link if tag == b"guid" => {
            if guid_is_link && value.starts_with("http") && entry.link.is_none() {
                entry.link = Some(value.to_string());
            }
        }
        Field::Link => {
            // RSS `<link>` text wins over a permalink guid seen earlier.
            entry.link = Some(value.to_string());
        }
        Field::Title => entry.title = plain_text(value),
        Field::Summary => entry.summary = plain_text(value),
        Field::Content => entry.content = plain_text(value),
        Field::Published => {
            if let Some(date) = parse_feed_date(value) {
                entry.published = Some(date);
            }
        }
        Field::Updated => {
            if entry.published.is_none() {
                entry.published = parse_feed_date(value);
            }
        }
    }
}

fn finish_entry(entry: Entry, feed_name: &str) -> Option<FeedItem> {
    let url = entry.link?.trim().to_string();
    if url.is_empty() {
        return None;
    }
    let summary = if entry.summary.is_empty() {
        entry.content
    } else {
        entry.summary
    };
    let mut item = FeedItem::new(url, summary)
        .with_title(entry.title)
        .with_source_feed(feed_name);
    if let Some(published) = entry.published {
        item = item.with_published_at(published);
    }
    Some(item)
}

fn href_of(e: &BytesStart) -> Option<String> {
    let mut href = None;
    let mut alternate = true;
    for attr in e.attributes().flatten() {
        match attr.key.local_name().as_ref() {
            b"href" => href = attr.unescape_value().ok().map(|v| v.trim().to_string()),
            b"rel" => {
                alternate = attr
                    .unescape_value()
                    .map(|v| v.trim() == "alternate")
                    .unwrap_or(false)
            }
            _ => {}
        }
    }
    href.filter(|h| alternate && !h.is_empty())
}

fn guid_is_permalink_false(e: &BytesStart) -> bool {
    e.attributes().flatten().any(|attr| {
        attr.key.local_name().as_ref() == b"isPermaLink"
            && attr
                .unescape_value()
                .map(|v| v.trim().eq_ignore_ascii_case("false"))
                .unwrap_or(false)
    })
}

/// Feed descriptions are often HTML; keep only their text.
fn plain_text(value: &str) -> String {
    if !value.contains('<') {
        return value.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    let fragment = Html::parse_fragment(value);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(raw) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0"?>
    <rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
      <channel>
        <title>News</title>
        <link>https://news.example/</link>
        <item>
          <title>First &amp; best</title>
          <link>https://news.example/1</link>
          <description><![CDATA[<p>Short <b>summary</b></p>]]></description>
          <pubDate>Mon, 06 May 2024 10:00:00 +0000</pubDate>
        </item>
        <item>
          <title>Repeat</title>
          <link>https://news.example/1</link>
        </item>
        <item>
          <title>Guid only</title>
          <guid isPermaLink="true">https://news.example/2</guid>
          <content:encoded><![CDATA[<p>Full text</p>]]></content:encoded>
        </item>
      </channel>
    </rss>"#;

    #[test]
    fn rss_items_are_read_in_order_without_repeats() {
        let items = parse_feed(RSS, "News", 10).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://news.example/1");
        assert_eq!(items[0].title, "First & best");
        assert_eq!(items[0].summary, "Short summary");
        assert_eq!(items[0].source_feed, "News");
        assert_eq!(
            items[0].published_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap())
        );
        assert_eq!(items[1].url, "https://news.example/2");
        assert_eq!(items[1].summary, "Full text");
    }

    #[test]
    fn limit_truncates() {
        let items = parse_feed(RSS, "News", 1).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn zero_limit_yields_no_items() {
        assert_eq!(parse_feed(RSS, "News", 0).unwrap(), Vec::<FeedItem>::new());
    }

    #[test]
    fn atom_entries_use_alternate_links() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom">
          <entry>
            <title>Atom post</title>
            <link rel="edit" href="https://blog.example/edit/1"/>
            <link rel="alternate" href="https://blog.example/1"/>
            <updated>2024-01-02T03:04:05Z</updated>
            <summary>Atom summary</summary>
          </entry>
        </feed>"#;
        let items = parse_feed(atom, "Blog", 5).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://blog.example/1");
        assert_eq!(items[0].summary, "Atom summary");
        assert_eq!(
            items[0].published_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
    }
}
