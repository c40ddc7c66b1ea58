//! Readable content extraction.
//!
//! [`Readability`] replaces the document of each HTML drop by its main
//! content, and [`Text`] derives the plain text of the combined result.
//!
//! # Example
//!
//! ```rust
//! use scrapbook_core::contents::{ExtractConfig, extract_readable};
//! use scrapbook_core::dom::Dom;
//!
//! let html = r#"<html><body><nav><a href="/">Home</a></nav>
//!     <article class="post"><p>A paragraph, with commas, and enough words to be the content.</p></article>
//! </body></html>"#;
//! let dom = extract_readable(&Dom::new(html), &ExtractConfig::default()).unwrap();
//! assert!(dom.body_html().starts_with("<section>"));
//! ```

mod clean;
mod prepare;
mod scoring;

pub use clean::{enclose_article, fix_noscript_images, fix_srcset, remove_embeds, simplify_top};
pub use prepare::prepare_html;
pub use scoring::{
    Article, ExtractConfig, ScoreConfig, ScoreResult, base_tag_score, calculate_score, class_id_weight,
    content_density_score, extract_article, link_density,
};

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::Result;
use crate::dom::{Document, Dom};
use crate::extract::{Drop, Extractor, Flow, ProcessMessage, Processor, Step};

static RX_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ ]+").expect("valid space regex"));
static RX_NEW_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n\s*(\r?\n)+").expect("valid new line regex"));

/// Select the main content of `dom` and return it as a new document whose
/// body starts with a `<section>`.
///
/// # Errors
///
/// Returns [`crate::ScrapbookError::NoContent`] or
/// [`crate::ScrapbookError::NotReadable`] when no content stands out.
pub fn extract_readable(dom: &Dom, config: &ExtractConfig) -> Result<Dom> {
    let article = {
        let doc = Document::parse(&prepare_html(dom.html()));
        extract_article(&doc, config)?
    };
    tracing::debug!(score = article.top_score, elements = article.element_count, "content selected");

    let mut content = Dom::new(format!("<html><head></head><body>{}</body></html>", article.content));
    clean::clean_content(&mut content);
    remove_embeds(&mut content);
    fix_srcset(&mut content);
    simplify_top(&mut content);
    enclose_article(&mut content);
    Ok(content)
}

/// Runs content extraction on every HTML drop.
///
/// Media drops lose their content. When nothing readable is found, the
/// drop content is reset and an error is logged.
#[derive(Debug, Default)]
pub struct Readability {
    config: ExtractConfig,
}

impl Readability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExtractConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Processor for Readability {
    fn name(&self) -> &'static str {
        "readability"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Dom {
            return Flow::Continue;
        }
        if x.drop().is_some_and(Drop::is_media) {
            m.reset_content(x);
            return Flow::Continue;
        }

        let result = match m.dom.as_mut() {
            Some(dom) => {
                let noscripts = fix_noscript_images(dom);
                if noscripts > 0 {
                    x.log().debug("noscript images fixed", &[("count", &noscripts)]);
                }
                extract_readable(dom, &self.config)
            }
            None => return Flow::Continue,
        };

        match result {
            Ok(content) => {
                x.log().debug("readability on contents", &[]);
                m.dom = Some(content);
            }
            Err(err) => {
                x.log().error("could not extract content", &[("error", &err)]);
                m.reset_content(x);
            }
        }
        Flow::Continue
    }
}

/// Plain text of an HTML document: runs of spaces collapsed, blank line
/// runs reduced to one empty line, trimmed.
pub fn text_content(html: &str) -> String {
    let text = Dom::new(html).text_content();
    let text = RX_SPACE.replace_all(&text, " ");
    let text = RX_NEW_LINE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Sets the extractor text from the final HTML.
pub struct Text;

#[async_trait]
impl Processor for Text {
    fn name(&self) -> &'static str {
        "text"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::PostProcess || x.html().is_empty() || !x.drop().is_some_and(Drop::is_html) {
            return Flow::Continue;
        }

        x.log().debug("get text content", &[]);
        let text = text_content(x.html());
        x.set_text(text);
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const ARTICLE: &str = r#"<!DOCTYPE html>
<html><head><title>A story</title><script>var tracking = true;</script></head>
<body>
  <header class="site-header"><a href="/">Home</a> <a href="/news">News</a></header>
  <div id="page">
    <div class="post-body">
      <h2>The story</h2>
      <p>The first paragraph of the story is long enough to count as real prose, with commas, clauses, and details.</p>
      <noscript><img src="/hidden.jpg"></noscript>
      <p>The second paragraph goes on, adding more sentences, more commas, and more words to read about.</p>
      <img srcset="/small.jpg 400w, /large.jpg 1200w" src="/small.jpg" width="400" height="200">
      <iframe src="https://video.example.net/embed/1"></iframe>
      <p>The third paragraph closes the story, once again with a few commas, and a conclusion at the end.</p>
    </div>
  </div>
  <div class="footer">Copyright, all rights reserved, some links and legal text that nobody reads.</div>
</body></html>"#;

    async fn run(html: &str, document_type: &str) -> Extractor {
        let mut ex = Extractor::new("https://example.net/story").unwrap().with_html(html);
        ex.drop_mut().unwrap().document_type = document_type.to_string();
        ex.add_processors([Arc::new(Readability::new()) as Arc<dyn Processor>, Arc::new(Text)]);
        ex.run().await;
        ex
    }

    #[tokio::test]
    async fn test_readability() {
        let ex = run(ARTICLE, "article").await;
        let body = &ex.drop().unwrap().body;

        assert!(body.starts_with("<section"), "{body}");
        assert!(body.contains("The third paragraph"));
        assert!(body.contains(r#"<img src="/large.jpg">"#));
        assert!(body.contains(r#"<img src="/hidden.jpg">"#));
        assert!(!body.contains("<iframe"));
        assert!(!body.contains("Copyright"));
        assert!(!body.contains("tracking"));
        assert!(!body.contains("News"));
        assert!(ex.errors().is_empty());
    }

    #[tokio::test]
    async fn test_readability_media() {
        let ex = run(ARTICLE, "video").await;
        assert_eq!(ex.drop().unwrap().body, "");
        assert_eq!(ex.html(), "");
        assert_eq!(ex.text(), "");
    }

    #[tokio::test]
    async fn test_readability_failure() {
        let ex = run("<html><body><nav><a href=\"/\">Home</a></nav></body></html>", "article").await;
        assert_eq!(ex.drop().unwrap().body, "");
        assert_eq!(ex.errors().len(), 1);
        assert!(ex.errors()[0].starts_with("could not extract content"));
    }

    #[tokio::test]
    async fn test_text() {
        let ex = run(ARTICLE, "article").await;
        let text = ex.text();
        assert!(text.starts_with("The story"), "{text}");
        assert!(text.ends_with("a conclusion at the end."));
        assert!(!text.contains("  "));
        assert!(!text.contains("\n\n\n"));
    }

    #[test]
    fn test_text_content() {
        let html = "<section><h1>Title</h1>\n\n\n   \n<p>one   two</p>\r\n\r\n<p>three</p></section>";
        assert_eq!(text_content(html), "Title\n\none two\n\nthree");
    }
}
