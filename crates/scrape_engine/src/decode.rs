use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};

/// How far into the document a `<meta charset>` declaration is looked for.
const META_PRESCAN_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHtml {
    pub html: String,
    pub encoding_label: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("body is empty")]
    Empty,
    #[error("body is not text in {encoding}")]
    NotText { encoding: String },
}

/// Decode a response body to UTF-8.
///
/// Order: BOM, Content-Type charset, `<meta charset>` prescan, chardetng guess.
/// Malformed sequences are replaced; a body that is mostly replacement
/// characters is treated as binary and rejected.
pub fn decode_html(bytes: &[u8], content_type: Option<&str>) -> Result<DecodedHtml, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let encoding = Encoding::for_bom(bytes)
        .map(|(enc, _)| enc)
        .or_else(|| {
            content_type
                .and_then(charset_from_content_type)
                .and_then(|label| Encoding::for_label(label.as_bytes()))
        })
        .or_else(|| meta_charset(bytes))
        .unwrap_or_else(|| {
            let mut detector = EncodingDetector::new();
            detector.feed(bytes, true);
            detector.guess(None, true)
        });

    let (text, used, _) = encoding.decode(bytes);
    let replaced = text.chars().filter(|c| *c == '\u{FFFD}').count();
    if replaced * 10 > text.chars().count() {
        return Err(DecodeError::NotText {
            encoding: used.name().to_string(),
        });
    }

    Ok(DecodedHtml {
        html: text.into_owned(),
        encoding_label: used.name().to_string(),
    })
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim_matches(&[' ', '"', '\''][..]).to_string())
    })
}

fn meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(META_PRESCAN_BYTES)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let start = head.find("charset=")? + "charset=".len();
    let label: String = head[start..]
        .trim_start_matches(&['"', '\''][..])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        .collect();
    let encoding = Encoding::for_label(label.as_bytes())?;
    // A page that claims UTF-16 in ASCII-compatible markup is really UTF-8.
    if encoding.name().starts_with("UTF-16") {
        return Some(UTF_8);
    }
    Some(encoding)
}
