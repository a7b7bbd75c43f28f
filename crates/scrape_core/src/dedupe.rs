use std::fmt::Write;

use url::{form_urlencoded, Url};

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid"];

/// Identity of an article across runs: scheme-less `host[:port]/path[?query]`.
///
/// `www.` is dropped, as are the fragment, default ports, tracking parameters
/// and trailing slashes, so `https://www.a.com/1/#top` and `a.com/1` share a key.
pub fn normalize_url_for_dedupe(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(url) = parse_lenient(trimmed) else {
        return trimmed.to_lowercase();
    };
    let Some(host) = url.host_str() else {
        return trimmed.to_lowercase();
    };

    let mut key = String::with_capacity(trimmed.len());
    key.push_str(host.strip_prefix("www.").unwrap_or(host));
    if let Some(port) = url.port() {
        let _ = write!(key, ":{port}");
    }
    key.push_str(url.path().trim_end_matches('/'));

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    if !kept.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        key.push('?');
        key.push_str(&query);
    }
    key
}

/// Host used for per-host pacing. Unlike the dedup key this keeps `www.`,
/// since that is the name the request actually goes to.
pub fn request_host(raw: &str) -> Option<String> {
    parse_lenient(raw.trim()).and_then(|url| url.host_str().map(str::to_ascii_lowercase))
}

fn parse_lenient(raw: &str) -> Option<Url> {
    if let Ok(url) = Url::parse(raw) {
        if url.has_host() && matches!(url.scheme(), "http" | "https") {
            return Some(url);
        }
    }
    Url::parse(&format!("https://{raw}"))
        .ok()
        .filter(|url| url.has_host())
}

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_www_fragment_and_trailing_slash_are_ignored() {
        assert_eq!(normalize_url_for_dedupe("a.com/1"), "a.com/1");
        assert_eq!(normalize_url_for_dedupe("https://www.a.com/1/"), "a.com/1");
        assert_eq!(normalize_url_for_dedupe("http://A.com/1#comments"), "a.com/1");
        assert_eq!(normalize_url_for_dedupe("https://a.com/"), "a.com");
    }

    #[test]
    fn tracking_params_are_removed_and_others_kept_in_order() {
        assert_eq!(
            normalize_url_for_dedupe("https://a.com/p?id=7&utm_source=rss&page=2&fbclid=x"),
            "a.com/p?id=7&page=2"
        );
        assert_eq!(normalize_url_for_dedupe("https://a.com/p?utm_medium=feed"), "a.com/p");
    }

    #[test]
    fn explicit_ports_survive_but_default_ports_do_not() {
        assert_eq!(normalize_url_for_dedupe("http://a.com:80/x"), "a.com/x");
        assert_eq!(normalize_url_for_dedupe("http://a.com:8080/x"), "a.com:8080/x");
    }

    #[test]
    fn unparseable_input_falls_back_to_lowercase_text() {
        assert_eq!(normalize_url_for_dedupe("  Not A Url  "), "not a url");
    }

    #[test]
    fn request_host_keeps_www() {
        assert_eq!(
            request_host("https://www.Example.com/a"),
            Some("www.example.com".to_string())
        );
        assert_eq!(request_host("example.com/a"), Some("example.com".to_string()));
    }
}
