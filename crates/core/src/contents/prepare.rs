//! Document cleanup before scoring.

use std::sync::LazyLock;

use lol_html::{HtmlRewriter, Settings, doc_comments, element};
use regex::Regex;

use super::scoring::RX_POSITIVE;

static RX_UNLIKELY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(banner|breadcrumbs?|combx|comment|community|disqus|extra|foot|header|menu|related|remark|rss|shoutbox|sidebar|sponsor|ad-break|agegate|pagination|pager|popup)",
    )
    .expect("valid unlikely candidates regex")
});

static RX_HIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(display\s*:\s*none|visibility\s*:\s*hidden)").expect("valid hidden style regex")
});

/// Tags whose content never belongs to an article.
const UNWANTED_TAGS: &str = "script, style, noscript, template, link, iframe, svg, canvas, form, button, input, select, textarea";

/// Elements never unwrapped as unlikely candidates.
const KEPT_TAGS: &[&str] = &["html", "body", "article", "main"];

fn is_unlikely(name: &str) -> bool {
    RX_UNLIKELY.is_match(name) && !RX_POSITIVE.is_match(name)
}

/// Remove scripts, styles, comments, hidden elements and every other
/// element that cannot be part of an article. Elements with an unlikely
/// class or id (and no positive one) are replaced by their content.
///
/// The input is returned unchanged when it cannot be rewritten.
pub fn prepare_html(html: &str) -> String {
    let mut output = Vec::with_capacity(html.len());
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!(UNWANTED_TAGS, |el| {
                    el.remove();
                    Ok(())
                }),
                element!("[style]", |el| {
                    if el.get_attribute("style").is_some_and(|style| RX_HIDDEN.is_match(&style)) {
                        el.remove();
                    }
                    Ok(())
                }),
                element!("[hidden]", |el| {
                    el.remove();
                    Ok(())
                }),
                element!("[id], [class]", |el| {
                    if el.removed() || KEPT_TAGS.contains(&el.tag_name().as_str()) {
                        return Ok(());
                    }
                    let id = el.get_attribute("id").unwrap_or_default();
                    let class = el.get_attribute("class").unwrap_or_default();
                    if is_unlikely(&id) || class.split_whitespace().any(is_unlikely) {
                        el.remove_and_keep_content();
                    }
                    Ok(())
                }),
            ],
            document_content_handlers: vec![doc_comments!(|c| {
                c.remove();
                Ok(())
            })],
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    if rewriter.write(html.as_bytes()).is_err() || rewriter.end().is_err() {
        return html.to_string();
    }

    match String::from_utf8(output) {
        Ok(out) if !out.is_empty() => out,
        _ => html.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_unwanted_tags() {
        let html = r#"<html>
            <head><script>alert('test');</script><style>body{color:red;}</style></head>
            <body>
                <noscript>Enable JavaScript</noscript>
                <iframe src="https://example.com"></iframe>
                <svg><rect width="100" height="100"/></svg>
                <form><input name="q"><button>Go</button></form>
                <p>Content</p>
            </body>
        </html>"#;

        let result = prepare_html(html);
        for gone in ["<script", "alert", "<style", "color:red", "Enable JavaScript", "example.com", "rect", "<form"] {
            assert!(!result.contains(gone), "{gone} should be removed");
        }
        assert!(result.contains("<p>Content</p>"));
    }

    #[test]
    fn test_remove_comments() {
        let html = "<!-- top --><html><body><!-- inside --><p>Visible content</p></body></html>";
        let result = prepare_html(html);
        assert!(!result.contains("<!--"));
        assert!(result.contains("Visible content"));
    }

    #[test]
    fn test_remove_unlikely_candidates() {
        let html = r#"<html><body>
            <div id="sidebar">Sidebar content</div>
            <div id="main-content">Main content</div>
            <div class="banner-ad">Ad</div>
            <div class="article">Article content</div>
            <article class="comments">Kept</article>
        </body></html>"#;

        let result = prepare_html(html);
        assert!(!result.contains("id=\"sidebar\""));
        assert!(result.contains("Sidebar content"));
        assert!(!result.contains("banner-ad"));
        assert!(result.contains("id=\"main-content\""));
        assert!(result.contains("class=\"article\""));
        assert!(result.contains("<article class=\"comments\">"));
    }

    #[test]
    fn test_remove_hidden_elements() {
        let html = r#"<html><body>
            <div style="display:none">Hidden content</div>
            <div style="visibility: hidden">Invisible content</div>
            <div hidden>Attribute hidden</div>
            <div style="color: red">Visible content</div>
        </body></html>"#;

        let result = prepare_html(html);
        assert!(!result.contains("Hidden content"));
        assert!(!result.contains("Invisible content"));
        assert!(!result.contains("Attribute hidden"));
        assert!(result.contains("Visible content"));
    }
}
