//! Byte to UTF-8 decoding for fetched HTML documents.

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use regex::bytes::Regex;
use std::sync::LazyLock;

/// How far into the document a `<meta charset>` declaration is looked for.
const META_SCAN_LIMIT: usize = 3 * 1024;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([a-zA-Z0-9_:.\-]+)"#).expect("valid charset regex")
});

/// A decoded document and the name of the encoding it was decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub encoding: &'static str,
}

/// Decode raw bytes using, in order: a byte order mark, the Content-Type
/// charset, a meta declaration near the top of the document, and finally
/// statistical detection.
pub fn decode_html(bytes: &[u8], charset: Option<&str>) -> Decoded {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    if let Some(encoding) = charset.and_then(|label| Encoding::for_label(label.trim().as_bytes())) {
        return decode_with(bytes, encoding);
    }

    let head = &bytes[..bytes.len().min(META_SCAN_LIMIT)];
    if let Some(encoding) = META_CHARSET
        .captures(head)
        .and_then(|c| c.get(1))
        .and_then(|m| Encoding::for_label(m.as_bytes()))
    {
        return decode_with(bytes, encoding);
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    decode_with(bytes, detector.guess(None, true))
}

/// Extract the `charset` parameter of a Content-Type value.
pub fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']).to_lowercase())
    })
}

/// The bare media type of a Content-Type value, lower cased.
pub fn media_type(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or_default().trim().to_lowercase()
}

fn decode_with(bytes: &[u8], encoding: &'static Encoding) -> Decoded {
    // UTF-16 labels in meta tags are always wrong for an ASCII-compatible stream.
    let encoding = encoding.output_encoding();
    let (text, used, _) = encoding.decode(bytes);
    Decoded { text: text.into_owned(), encoding: used.name() }
}
