use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::ElementRef;

/// Never contribute text, not even as boilerplate.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "template", "svg", "form", "button", "select",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "header", "footer", "nav", "aside", "figure",
    "figcaption", "table", "tr", "td", "th", "blockquote", "address", "ul", "ol", "li", "dl",
    "dt", "dd", "pre", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
];

const BOILERPLATE_TAGS: &[&str] = &["nav", "header", "footer", "aside"];

const BOILERPLATE_ROLES: &[&str] = &["navigation", "banner", "contentinfo", "complementary"];

const BOILERPLATE_CLASSES: &[&str] = &[
    "related",
    "related-posts",
    "newsletter",
    "newsletter-signup",
    "share",
    "sharing",
    "social",
    "social-share",
    "comments",
    "comment-list",
    "advert",
    "advertisement",
    "ad",
    "ads",
    "sidebar",
    "breadcrumb",
    "breadcrumbs",
    "subscribe",
    "promo",
];

/// Text of a subtree, split into what reads as article and what reads as chrome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CollectedText {
    /// Article text, one line per block, whitespace collapsed.
    pub text: String,
    /// Non-whitespace characters kept in `text`.
    pub body_chars: usize,
    /// Part of `body_chars` that sat inside links.
    pub link_chars: usize,
    /// Non-whitespace characters inside navigation, ads, share bars and similar.
    pub boilerplate_chars: usize,
}

impl CollectedText {
    pub fn boilerplate_ratio(&self) -> f64 {
        let total = self.body_chars + self.boilerplate_chars;
        if total == 0 {
            return 0.0;
        }
        (self.boilerplate_chars + self.link_chars) as f64 / total as f64
    }

    pub fn merge(&mut self, other: CollectedText) {
        if other.text.is_empty() {
            self.boilerplate_chars += other.boilerplate_chars;
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(&other.text);
        self.body_chars += other.body_chars;
        self.link_chars += other.link_chars;
        self.boilerplate_chars += other.boilerplate_chars;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Body,
    Link,
    Boilerplate,
}

pub(crate) fn collect_text(root: ElementRef) -> CollectedText {
    let mut ctx = TextBuffer::default();
    let region = if is_boilerplate(root) {
        Region::Boilerplate
    } else {
        Region::Body
    };
    for child in root.children() {
        visit_node(child, &mut ctx, region);
    }
    ctx.finish()
}

fn visit_node(node: NodeRef<'_, Node>, ctx: &mut TextBuffer, region: Region) {
    match node.value() {
        Node::Text(text) => ctx.append_text(text, region),
        Node::Element(_) => {
            if let Some(element) = ElementRef::wrap(node) {
                visit_element(element, ctx, region);
            }
        }
        _ => {
            for child in node.children() {
                visit_node(child, ctx, region);
            }
        }
    }
}

fn visit_element(element: ElementRef, ctx: &mut TextBuffer, region: Region) {
    let tag = element.value().name();
    if SKIPPED_TAGS.contains(&tag) {
        return;
    }

    let region = match region {
        Region::Boilerplate => Region::Boilerplate,
        _ if is_boilerplate(element) => Region::Boilerplate,
        _ if tag == "a" => Region::Link,
        other => other,
    };

    let block = BLOCK_TAGS.contains(&tag);
    if block || tag == "br" {
        ctx.ensure_newline(region);
    }
    for child in element.children() {
        visit_node(child, ctx, region);
    }
    if block {
        ctx.ensure_newline(region);
    }
}

fn is_boilerplate(element: ElementRef) -> bool {
    let value = element.value();
    if BOILERPLATE_TAGS.contains(&value.name()) {
        return true;
    }
    if value
        .attr("role")
        .is_some_and(|role| BOILERPLATE_ROLES.contains(&role.trim()))
    {
        return true;
    }
    value
        .classes()
        .any(|class| BOILERPLATE_CLASSES.contains(&class.to_ascii_lowercase().as_str()))
}

#[derive(Default)]
struct TextBuffer {
    builder: String,
    last_char: Option<char>,
    body_chars: usize,
    link_chars: usize,
    boilerplate_chars: usize,
}

impl TextBuffer {
    fn append_text(&mut self, text: &str, region: Region) {
        if region == Region::Boilerplate {
            self.boilerplate_chars += text.chars().filter(|c| !c.is_whitespace()).count();
            return;
        }
        for ch in text.chars() {
            if ch.is_whitespace() {
                if self.last_char.is_none() || matches!(self.last_char, Some(' ' | '\n')) {
                    continue;
                }
                self.push_char(' ');
            } else {
                self.body_chars += 1;
                if region == Region::Link {
                    self.link_chars += 1;
                }
                self.push_char(ch);
            }
        }
    }

    fn ensure_newline(&mut self, region: Region) {
        if region == Region::Boilerplate || self.builder.is_empty() || self.last_char == Some('\n') {
            return;
        }
        self.push_char('\n');
    }

    fn push_char(&mut self, ch: char) {
        self.builder.push(ch);
        self.last_char = Some(ch);
    }

    fn finish(self) -> CollectedText {
        let text = self
            .builder
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        CollectedText {
            text,
            body_chars: self.body_chars,
            link_chars: self.link_chars,
            boilerplate_chars: self.boilerplate_chars,
        }
    }
}
