//! URL helpers for the archiver.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use url::Url;

/// A `url(...)` token in a stylesheet, quoted or not.
pub(super) static RX_CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\burl\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#).expect("valid css url regex")
});

/// True for references that are never fetched.
pub fn is_skipped(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.starts_with("data:") || value.starts_with('#')
}

/// Resolve `value` against `base` and clean the result.
///
/// Skipped references and values that cannot be joined are returned as is.
pub fn absolute_url(value: &str, base: &Url) -> String {
    let value = value.trim();
    if is_skipped(value) {
        return value.to_string();
    }
    match base.join(value) {
        Ok(mut url) => {
            clean_url(&mut url);
            url.to_string()
        }
        Err(_) => value.to_string(),
    }
}

/// Drop the fragment and every `utm_*` query parameter.
pub fn clean_url(url: &mut Url) {
    url.set_fragment(None);
    if url.query().is_none() {
        return;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}

/// Strip the quotes and spaces around a CSS `url()` argument.
pub fn sanitize_style_url(value: &str) -> &str {
    value.trim().trim_matches(['"', '\'']).trim()
}

/// Build a base64 `data:` URL.
pub fn data_url(content_type: &str, data: &[u8]) -> String {
    format!("data:{content_type};base64,{}", STANDARD.encode(data))
}

/// The value of a CSS `url()` token captured by [`RX_CSS_URL`].
pub(super) fn css_token_value<'a>(caps: &regex::Captures<'a>) -> &'a str {
    caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)).map_or("", |m| m.as_str())
}

/// Split a `srcset` value into `(url, descriptor)` candidates.
///
/// URLs may contain commas (`data:` URLs do); a URL only ends at a space or
/// at trailing commas.
pub fn srcset_candidates(value: &str) -> Vec<(&str, &str)> {
    let mut candidates = Vec::new();
    let mut rest = value;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (url, tail) = rest.split_at(end);
        if url.ends_with(',') {
            candidates.push((url.trim_end_matches(','), ""));
            rest = tail;
            continue;
        }

        let end = tail.find(',').unwrap_or(tail.len());
        candidates.push((url, tail[..end].trim()));
        rest = &tail[end..];
    }
    candidates
}

/// Rebuild a `srcset` value, mapping each candidate URL through `f`.
pub fn rewrite_srcset(value: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    srcset_candidates(value)
        .into_iter()
        .map(|(url, descriptor)| {
            let url = f(url).unwrap_or_else(|| url.to_string());
            if descriptor.is_empty() { url } else { format!("{url} {descriptor}") }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
