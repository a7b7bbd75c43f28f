use chrono::{DateTime, NaiveDate, Utc};
use scrape_core::PageMetadata;
use scraper::{ElementRef, Html, Selector};

use crate::text::{collect_text, CollectedText};

/// Ordered from most to least specific; the first one with enough text wins.
const CONTENT_SELECTORS: &[&str] = &[
    "#entry-content",
    ".entry-content",
    "article.post",
    "article[role=\"main\"]",
    "main article",
    "div.article-content",
    "div.post-content",
    "div.content-body",
    "section.post-content",
    "div.article-body",
    "div.content",
    "article",
    "main",
];

const LANDING_CARD_SELECTOR: &str = ".post-card, .article-card, .entry-card";
const PAYWALL_SELECTOR: &str = ".paywall, .subscriber-only, .premium-content, iframe.omedagate";

const MIN_CONTAINER_CHARS: usize = 100;
const MIN_PARAGRAPH_CHARS: usize = 30;
const MAX_LANDING_CARDS: usize = 2;
const PAYWALL_FACTOR: f64 = 0.5;

/// Lowercased markers of interstitial anti-bot pages served with a 2xx status.
const CHALLENGE_MARKERS: &[&str] = &[
    "just a moment",
    "cf-browser-verification",
    "challenge-platform",
    "attention required",
    "captcha-delivery",
    "px-captcha",
    "_incapsula_resource",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub title: Option<String>,
    pub body: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub word_count: usize,
    pub boilerplate_ratio: f64,
    pub paywalled: bool,
    pub quality_score: f64,
}

impl ParsedDocument {
    pub fn metadata(&self) -> PageMetadata {
        PageMetadata {
            title: self.title.clone(),
            author: self.author.clone(),
            published_at: self.published_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("landing page with {cards} article cards")]
    LandingPage { cards: usize },
    #[error("no content container found")]
    NoContentContainer,
}

pub trait Extractor: Send + Sync {
    fn parse(&self, html: &str) -> Result<ParsedDocument, ParseError>;
}

/// Scales word count by the share of non-boilerplate text, halved behind a paywall.
pub fn quality_score(word_count: usize, boilerplate_ratio: f64, paywalled: bool) -> f64 {
    let clean = (1.0 - boilerplate_ratio).clamp(0.0, 1.0);
    let factor = if paywalled { PAYWALL_FACTOR } else { 1.0 };
    word_count as f64 * clean * factor
}

/// True when a successful response is really an anti-bot interstitial.
pub fn looks_like_challenge(html: &str) -> bool {
    // Markers live in the head or the first script blocks.
    let head: String = html.chars().take(16 * 1024).collect::<String>().to_lowercase();
    CHALLENGE_MARKERS.iter().any(|marker| head.contains(marker))
}

/// Selector-driven article extractor for news and blog pages.
///
/// Picks the first content container with more than a hundred characters of
/// text, falling back to the page's longer paragraphs, and scores the result
/// with [`quality_score`].
#[derive(Debug)]
pub struct ArticleExtractor {
    content: Vec<Selector>,
    paragraph: Option<Selector>,
    landing_cards: Option<Selector>,
    paywall: Option<Selector>,
    og_title: Option<Selector>,
    title: Option<Selector>,
    h1: Option<Selector>,
    meta_author: Option<Selector>,
    rel_author: Option<Selector>,
    byline: Option<Selector>,
    meta_published: Option<Selector>,
    time: Option<Selector>,
}

impl Default for ArticleExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ArticleExtractor {
    pub fn new() -> Self {
        Self {
            content: CONTENT_SELECTORS
                .iter()
                .filter_map(|css| Selector::parse(css).ok())
                .collect(),
            paragraph: Selector::parse("p").ok(),
            landing_cards: Selector::parse(LANDING_CARD_SELECTOR).ok(),
            paywall: Selector::parse(PAYWALL_SELECTOR).ok(),
            og_title: Selector::parse("meta[property=\"og:title\"]").ok(),
            title: Selector::parse("title").ok(),
            h1: Selector::parse("h1").ok(),
            meta_author: Selector::parse("meta[name=\"author\"]").ok(),
            rel_author: Selector::parse("[rel=\"author\"]").ok(),
            byline: Selector::parse(".author, .byline").ok(),
            meta_published: Selector::parse("meta[property=\"article:published_time\"]").ok(),
            time: Selector::parse("time[datetime]").ok(),
        }
    }

    fn body(&self, doc: &Html) -> Result<CollectedText, ParseError> {
        let mut shortest_match: Option<CollectedText> = None;
        for selector in &self.content {
            let Some(container) = doc.select(selector).next() else {
                continue;
            };
            let collected = collect_text(container);
            if collected.text.chars().count() > MIN_CONTAINER_CHARS {
                return Ok(collected);
            }
            let longer = shortest_match
                .as_ref()
                .is_none_or(|best| collected.text.len() > best.text.len());
            if !collected.text.is_empty() && longer {
                shortest_match = Some(collected);
            }
        }

        let mut paragraphs = CollectedText::default();
        if let Some(selector) = &self.paragraph {
            for p in doc.select(selector) {
                let collected = collect_text(p);
                if collected.text.chars().count() > MIN_PARAGRAPH_CHARS {
                    paragraphs.merge(collected);
                }
            }
        }
        if paragraphs.text.chars().count() > MIN_CONTAINER_CHARS {
            return Ok(paragraphs);
        }

        // A short but real container still beats nothing; the threshold judges it.
        shortest_match
            .or_else(|| (!paragraphs.text.is_empty()).then_some(paragraphs))
            .ok_or(ParseError::NoContentContainer)
    }

    fn title(&self, doc: &Html) -> Option<String> {
        first_attr(doc, self.og_title.as_ref(), "content")
            .or_else(|| first_text(doc, self.title.as_ref()))
            .or_else(|| first_text(doc, self.h1.as_ref()))
    }

    fn author(&self, doc: &Html) -> Option<String> {
        first_attr(doc, self.meta_author.as_ref(), "content")
            .or_else(|| first_text(doc, self.rel_author.as_ref()))
            .or_else(|| first_text(doc, self.byline.as_ref()))
            .map(|author| strip_by_prefix(&author))
            .filter(|author| !author.is_empty())
    }

    fn published_at(&self, doc: &Html) -> Option<DateTime<Utc>> {
        first_attr(doc, self.meta_published.as_ref(), "content")
            .and_then(|raw| parse_date(&raw))
            .or_else(|| {
                let selector = self.time.as_ref()?;
                doc.select(selector)
                    .filter_map(|el| el.value().attr("datetime"))
                    .find_map(parse_date)
            })
    }
}

impl Extractor for ArticleExtractor {
    fn parse(&self, html: &str) -> Result<ParsedDocument, ParseError> {
        let doc = Html::parse_document(html);

        if let Some(selector) = &self.landing_cards {
            let cards = doc.select(selector).count();
            if cards > MAX_LANDING_CARDS {
                return Err(ParseError::LandingPage { cards });
            }
        }

        let collected = self.body(&doc)?;
        let paywalled = self
            .paywall
            .as_ref()
            .is_some_and(|selector| doc.select(selector).next().is_some());
        let word_count = collected.text.split_whitespace().count();
        let boilerplate_ratio = collected.boilerplate_ratio();

        Ok(ParsedDocument {
            title: self.title(&doc),
            author: self.author(&doc),
            published_at: self.published_at(&doc),
            word_count,
            boilerplate_ratio,
            paywalled,
            quality_score: quality_score(word_count, boilerplate_ratio, paywalled),
            body: collected.text,
        })
    }
}

fn first_text(doc: &Html, selector: Option<&Selector>) -> Option<String> {
    let selector = selector?;
    doc.select(selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn first_attr(doc: &Html, selector: Option<&Selector>, attr: &str) -> Option<String> {
    let selector = selector?;
    doc.select(selector)
        .filter_map(|el| el.value().attr(attr))
        .map(|value| value.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|value| !value.is_empty())
}

fn element_text(element: ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_by_prefix(author: &str) -> String {
    let trimmed = author.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("by ") {
        trimmed[3..].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn score_grows_with_length_and_drops_with_boilerplate() {
        assert!(quality_score(300, 0.1, false) > quality_score(200, 0.1, false));
        assert!(quality_score(300, 0.5, false) < quality_score(300, 0.1, false));
        assert_eq!(quality_score(300, 0.0, true), 150.0);
    }

    #[test]
    fn picks_entry_content_and_reads_metadata() {
        let html = format!(
            r#"<html><head><title>Fallback</title>
            <meta property="og:title" content="Real Title">
            <meta name="author" content="By Jane Roe">
            <meta property="article:published_time" content="2024-05-01T08:30:00Z">
            </head><body>
            <nav>Home About Contact</nav>
            <div id="entry-content"><p>{}</p></div>
            </body></html>"#,
            words(200)
        );
        let doc = ArticleExtractor::new().parse(&html).unwrap();
        assert_eq!(doc.title.as_deref(), Some("Real Title"));
        assert_eq!(doc.author.as_deref(), Some("Jane Roe"));
        assert_eq!(
            doc.published_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap())
        );
        assert_eq!(doc.word_count, 200);
        assert!(!doc.body.contains("Home"));
        assert!((doc.quality_score - 200.0).abs() < 1e-9);
    }

    #[test]
    fn short_containers_fall_back_to_paragraphs() {
        let html = format!(
            "<body><article>tiny</article><p>{}</p><p>short</p></body>",
            words(40)
        );
        let doc = ArticleExtractor::new().parse(&html).unwrap();
        assert_eq!(doc.word_count, 40);
        assert!(!doc.body.contains("short"));
    }

    #[test]
    fn landing_pages_are_rejected() {
        let html = r#"<body><div class="post-card">a</div><div class="post-card">b</div>
            <div class="article-card">c</div></body>"#;
        assert_eq!(
            ArticleExtractor::new().parse(html),
            Err(ParseError::LandingPage { cards: 3 })
        );
    }

    #[test]
    fn empty_page_has_no_container() {
        assert_eq!(
            ArticleExtractor::new().parse("<html><body></body></html>"),
            Err(ParseError::NoContentContainer)
        );
    }

    #[test]
    fn paywall_halves_the_score() {
        let html = format!(
            "<body><article><p>{}</p><div class=\"paywall\"></div></article></body>",
            words(100)
        );
        let doc = ArticleExtractor::new().parse(&html).unwrap();
        assert!(doc.paywalled);
        assert!((doc.quality_score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn time_element_supplies_plain_dates() {
        let html = format!(
            "<body><article><time datetime=\"2024-02-03\">Feb 3</time><p>{}</p></article></body>",
            words(30)
        );
        let doc = ArticleExtractor::new().parse(&html).unwrap();
        assert_eq!(
            doc.published_at,
            Some(Utc.with_ymd_and_hms(2024, 2, 3, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn challenge_pages_are_recognised() {
        assert!(looks_like_challenge(
            "<html><head><title>Just a moment...</title></head></html>"
        ));
        assert!(!looks_like_challenge("<html><body><p>News</p></body></html>"));
    }
}
