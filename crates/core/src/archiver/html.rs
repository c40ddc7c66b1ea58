//! Reference discovery and rewriting in HTML documents.
//!
//! Both passes stream the document through `lol_html`: [`discover`] lists
//! every resource reference the enabled flags ask for, [`rewrite`] swaps them
//! for their resolved values and removes what the disabled flags exclude.

use std::cell::RefCell;
use std::collections::HashMap;

use lol_html::html_content::ContentType;
use lol_html::{HtmlRewriter, Settings, element, text};

use super::ArchiveFlags;
use super::url::{rewrite_srcset, srcset_candidates};
use crate::{Result, ScrapbookError};

/// How a reference is processed once fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RefKind {
    /// Bytes must be an image.
    Image,
    /// HTML is archived recursively.
    Embed,
    Other,
}

/// Elements and attributes holding a single URL.
const URL_ATTRIBUTES: &[(&str, &str, RefKind, ArchiveFlags)] = &[
    ("img[src]", "src", RefKind::Image, ArchiveFlags::IMAGES),
    ("input[type=\"image\"][src]", "src", RefKind::Image, ArchiveFlags::IMAGES),
    ("link[rel~=\"stylesheet\"][href]", "href", RefKind::Other, ArchiveFlags::CSS),
    ("script[src]", "src", RefKind::Other, ArchiveFlags::JS),
    ("iframe[src]", "src", RefKind::Embed, ArchiveFlags::EMBEDS),
    ("embed[src]", "src", RefKind::Other, ArchiveFlags::EMBEDS),
    ("object[data]", "data", RefKind::Other, ArchiveFlags::EMBEDS),
    ("video[src]", "src", RefKind::Other, ArchiveFlags::MEDIA),
    ("video[poster]", "poster", RefKind::Other, ArchiveFlags::MEDIA),
    ("audio[src]", "src", RefKind::Other, ArchiveFlags::MEDIA),
    ("video source[src], audio source[src]", "src", RefKind::Other, ArchiveFlags::MEDIA),
    ("track[src]", "src", RefKind::Other, ArchiveFlags::MEDIA),
];

/// Elements whose `srcset` lists image candidates.
const SRCSET_ELEMENTS: &[(&str, RefKind)] =
    &[("img[srcset]", RefKind::Image), ("picture source[srcset]", RefKind::Other)];

/// Elements removed when their flag is disabled.
const REMOVED_ELEMENTS: &[(&str, ArchiveFlags)] = &[
    ("link[rel~=\"stylesheet\"], style", ArchiveFlags::CSS),
    ("script", ArchiveFlags::JS),
    ("iframe, embed, object", ArchiveFlags::EMBEDS),
    ("video, audio", ArchiveFlags::MEDIA),
];

/// References found in a document.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Discovered {
    /// Raw attribute values with the way they must be processed.
    pub refs: Vec<(String, RefKind)>,
    /// Inline stylesheets and `style` attributes holding a `url()`.
    pub styles: Vec<String>,
}

/// Replacement values produced by resolution.
#[derive(Debug, Default)]
pub(crate) struct Replacements {
    pub refs: HashMap<(String, RefKind), String>,
    pub styles: HashMap<String, String>,
}

pub(crate) fn discover(html: &str, flags: ArchiveFlags) -> Result<Discovered> {
    let found = RefCell::new(Discovered::default());
    let style = RefCell::new(String::new());
    let mut handlers = Vec::new();

    for &(selector, attr, kind, flag) in URL_ATTRIBUTES {
        if !flags.contains(flag) {
            continue;
        }
        let found = &found;
        handlers.push(element!(selector, move |el| {
            if let Some(value) = el.get_attribute(attr) {
                found.borrow_mut().refs.push((value, kind));
            }
            Ok(())
        }));
    }

    if flags.contains(ArchiveFlags::IMAGES) {
        for &(selector, kind) in SRCSET_ELEMENTS {
            let found = &found;
            handlers.push(element!(selector, move |el| {
                if let Some(value) = el.get_attribute("srcset") {
                    let mut found = found.borrow_mut();
                    for (url, _) in srcset_candidates(&value) {
                        found.refs.push((url.to_string(), kind));
                    }
                }
                Ok(())
            }));
        }
    }

    if flags.contains(ArchiveFlags::CSS) {
        handlers.push(element!("[style]", |el| {
            if let Some(value) = el.get_attribute("style")
                && value.to_lowercase().contains("url(")
            {
                found.borrow_mut().styles.push(value);
            }
            Ok(())
        }));
        handlers.push(text!("style", |chunk| {
            let mut buffer = style.borrow_mut();
            buffer.push_str(chunk.as_str());
            if chunk.last_in_text_node() {
                let css = std::mem::take(&mut *buffer);
                if !css.trim().is_empty() {
                    found.borrow_mut().styles.push(css);
                }
            }
            Ok(())
        }));
    }

    run(html, Settings { element_content_handlers: handlers, ..Settings::default() })?;
    Ok(found.into_inner())
}

pub(crate) fn rewrite(html: &str, flags: ArchiveFlags, replacements: &Replacements) -> Result<String> {
    let style = RefCell::new(String::new());
    let mut handlers = Vec::new();

    for &(selector, flag) in REMOVED_ELEMENTS {
        if !flags.contains(flag) {
            handlers.push(element!(selector, |el| {
                el.remove();
                Ok(())
            }));
        }
    }

    for &(selector, attr, kind, flag) in URL_ATTRIBUTES {
        if !flags.contains(flag) {
            continue;
        }
        handlers.push(element!(selector, move |el| {
            if let Some(value) = el.get_attribute(attr)
                && let Some(new) = replacements.refs.get(&(value, kind))
            {
                el.set_attribute(attr, new)?;
            }
            Ok(())
        }));
    }

    if flags.contains(ArchiveFlags::IMAGES) {
        for &(selector, kind) in SRCSET_ELEMENTS {
            handlers.push(element!(selector, move |el| {
                if let Some(value) = el.get_attribute("srcset") {
                    let srcset =
                        rewrite_srcset(&value, |url| replacements.refs.get(&(url.to_string(), kind)).cloned());
                    el.set_attribute("srcset", &srcset)?;
                }
                Ok(())
            }));
        }
    }

    if flags.contains(ArchiveFlags::CSS) {
        handlers.push(element!("[style]", |el| {
            if let Some(value) = el.get_attribute("style")
                && let Some(new) = replacements.styles.get(&value)
            {
                el.set_attribute("style", new)?;
            }
            Ok(())
        }));
        handlers.push(text!("style", |chunk| {
            let mut buffer = style.borrow_mut();
            buffer.push_str(chunk.as_str());
            if !chunk.last_in_text_node() {
                chunk.remove();
                return Ok(());
            }
            let css = std::mem::take(&mut *buffer);
            let css = replacements.styles.get(&css).map_or(css.as_str(), String::as_str);
            chunk.replace(css, ContentType::Html);
            Ok(())
        }));
    } else {
        handlers.push(element!("[style]", |el| {
            el.remove_attribute("style");
            Ok(())
        }));
    }

    if !flags.contains(ArchiveFlags::JS) {
        handlers.push(element!("noscript", |el| {
            el.remove_and_keep_content();
            Ok(())
        }));
        handlers.push(element!("*", |el| {
            let events: Vec<String> = el
                .attributes()
                .iter()
                .map(|a| a.name())
                .filter(|name| name.starts_with("on"))
                .collect();
            for name in events {
                el.remove_attribute(&name);
            }
            Ok(())
        }));
    }

    run(html, Settings { element_content_handlers: handlers, ..Settings::default() })
}

fn run(html: &str, settings: Settings<'_, '_>) -> Result<String> {
    let mut output = Vec::with_capacity(html.len());
    let mut rewriter = HtmlRewriter::new(settings, |c: &[u8]| output.extend_from_slice(c));

    rewriter
        .write(html.as_bytes())
        .map_err(|e| ScrapbookError::HtmlParseError(e.to_string()))?;
    rewriter.end().map_err(|e| ScrapbookError::HtmlParseError(e.to_string()))?;

    String::from_utf8(output).map_err(|_| ScrapbookError::InvalidEncoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"<html><head>
<link rel="stylesheet" href="/main.css"><link rel="icon" href="/favicon.ico">
<style>body { background: url(bg.png) }</style>
<script src="/app.js"></script>
</head><body onload="init()">
<img src="/a.png" srcset="/a.png 1x, /a2.png 2x">
<picture><source srcset="/b.webp"><img src="/b.png"></picture>
<div style="background-image: url('/c.png')">x</div>
<iframe src="/frame.html"></iframe>
<video src="/v.mp4" poster="/poster.jpg"><track src="/subs.vtt"></video>
<noscript><p>No script</p></noscript>
</body></html>"#;

    fn refs(found: &Discovered) -> Vec<(&str, RefKind)> {
        found.refs.iter().map(|(v, k)| (v.as_str(), *k)).collect()
    }

    #[test]
    fn test_discover_default_flags() {
        let found = discover(PAGE, ArchiveFlags::default()).unwrap();
        assert_eq!(
            refs(&found),
            vec![
                ("/a.png", RefKind::Image),
                ("/a.png", RefKind::Image),
                ("/a2.png", RefKind::Image),
                ("/b.webp", RefKind::Other),
                ("/b.png", RefKind::Image),
                ("/frame.html", RefKind::Embed),
            ]
        );
        assert!(found.styles.is_empty());
    }

    #[test]
    fn test_discover_all_flags() {
        let found = discover(PAGE, ArchiveFlags::all()).unwrap();
        let values: Vec<&str> = found.refs.iter().map(|(v, _)| v.as_str()).collect();
        for url in ["/main.css", "/app.js", "/v.mp4", "/poster.jpg", "/subs.vtt"] {
            assert!(values.contains(&url), "{url} not found");
        }
        assert!(!values.contains(&"/favicon.ico"));
        assert_eq!(
            found.styles,
            vec!["body { background: url(bg.png) }".to_string(), "background-image: url('/c.png')".to_string()]
        );
    }

    #[test]
    fn test_rewrite_removes_disabled() {
        let out = rewrite(PAGE, ArchiveFlags::default(), &Replacements::default()).unwrap();
        for gone in ["<link rel=\"stylesheet\"", "<style>", "<script", "onload", "style=", "<video", "<noscript>"] {
            assert!(!out.contains(gone), "{gone} should be removed");
        }
        assert!(out.contains("<p>No script</p>"));
        assert!(out.contains("<iframe src=\"/frame.html\">"));
        assert!(out.contains("rel=\"icon\""));
    }

    #[test]
    fn test_rewrite_replaces_values() {
        let mut replacements = Replacements::default();
        for (value, kind, new) in [
            ("/a.png", RefKind::Image, "A"),
            ("/a2.png", RefKind::Image, "A2"),
            ("/b.webp", RefKind::Other, "B"),
            ("/main.css", RefKind::Other, "CSS"),
        ] {
            replacements.refs.insert((value.to_string(), kind), new.to_string());
        }
        replacements
            .styles
            .insert("body { background: url(bg.png) }".to_string(), "body { background: url(\"BG\") }".to_string());
        replacements
            .styles
            .insert("background-image: url('/c.png')".to_string(), "background-image: url(\"C\")".to_string());

        let out = rewrite(PAGE, ArchiveFlags::all(), &replacements).unwrap();
        assert!(out.contains(r#"<img src="A" srcset="A 1x, A2 2x">"#), "{out}");
        assert!(out.contains(r#"<source srcset="B">"#));
        assert!(out.contains(r#"<img src="/b.png">"#));
        assert!(out.contains(r#"<link rel="stylesheet" href="CSS">"#));
        assert!(out.contains(r#"<style>body { background: url("BG") }</style>"#));
        assert!(out.contains(r#"style="background-image: url(&quot;C&quot;)""#));
        assert!(out.contains("onload=\"init()\""));
    }
}
