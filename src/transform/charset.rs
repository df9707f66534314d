//! Charset detection and conversion for transformed bodies.
//!
//! Transforms always see UTF-8. The source charset comes from the
//! `Content-Type` parameter, or is sniffed from an XML declaration or an HTML
//! `<meta>` tag in the first kilobyte of the body.

use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use regex::bytes::Regex as BytesRegex;
use regex::Regex;

static CHARSET_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\Wcharset\s*=\s*["']?([^"';\s]+)"#).unwrap());

static XML_DECL: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(r#"^(?-u:\xEF\xBB\xBF)?\s*<\?xml[^>]*?\sencoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#).unwrap()
});

static META_CHARSET: Lazy<BytesRegex> =
    Lazy::new(|| BytesRegex::new(r#"(?i)<meta\s[^>]*?charset\s*=\s*["']?([A-Za-z0-9._:-]+)"#).unwrap());

/// Bytes inspected when sniffing.
const SNIFF_LIMIT: usize = 1024;

/// The `charset` parameter of a `Content-Type` value.
pub fn charset_param(content_type: &str) -> Option<&str> {
    CHARSET_PARAM
        .captures(content_type)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// `content_type` with its `charset` parameter set to `label`.
pub fn with_charset(content_type: &str, label: &str) -> String {
    let essence = content_type
        .split(';')
        .filter(|param| !param.trim_start().to_ascii_lowercase().starts_with("charset="))
        .collect::<Vec<_>>()
        .join(";");
    format!("{}; charset={label}", essence.trim_end())
}

/// Charset declared inside the document.
pub fn sniff(body: &[u8]) -> Option<String> {
    let head = &body[..body.len().min(SNIFF_LIMIT)];
    XML_DECL
        .captures(head)
        .or_else(|| META_CHARSET.captures(head))
        .and_then(|c| c.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
}

/// Resolve a charset label, falling back to UTF-8 for unknown labels.
pub fn lookup(label: Option<&str>) -> &'static Encoding {
    label
        .and_then(|l| Encoding::for_label(l.trim().as_bytes()))
        .unwrap_or(UTF_8)
}

/// Decode to UTF-8. Malformed sequences become U+FFFD.
pub fn decode(body: &[u8], encoding: &'static Encoding) -> String {
    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    if had_errors {
        tracing::debug!(charset = encoding.name(), "Malformed input replaced while decoding");
    }
    text.into_owned()
}

/// Encode UTF-8 text back into `encoding`.
///
/// Returns the bytes and the encoding actually used, which differs for
/// UTF-16 labels (the output is UTF-8 then).
pub fn encode(text: &str, encoding: &'static Encoding) -> (Vec<u8>, &'static Encoding) {
    let (bytes, used, unmappable) = encoding.encode(text);
    if unmappable {
        tracing::debug!(charset = used.name(), "Unmappable characters written as numeric references");
    }
    (bytes.into_owned(), used)
}
