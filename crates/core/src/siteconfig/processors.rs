//! Extraction processors driven by site rules.
//!
//! [`LoadConfiguration`] resolves the rules for the first drop and stores
//! them in the message under [`CONFIG_KEY`]; every other processor here is a
//! no-op when no rules were stored.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::dom::Document;
use crate::extract::{Extractor, Flow, ProcessMessage, Processor, Step, parse_date};
use crate::siteconfig::directives::SiteConfig;
use crate::siteconfig::loader::ConfigLoader;

/// Message key holding the `Arc<SiteConfig>` of the run.
pub const CONFIG_KEY: &str = "config";
/// Message key holding the next page [`Url`], handed from Dom to Finish.
pub const NEXT_PAGE_KEY: &str = "next_page";

fn site_config(m: &ProcessMessage) -> Option<Arc<SiteConfig>> {
    m.value::<Arc<SiteConfig>>(CONFIG_KEY).cloned()
}

/// Quote a value as an XPath string literal.
fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{value}'")
    } else if !value.contains('"') {
        format!("\"{value}\"")
    } else {
        let parts: Vec<String> = value.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Target of the first node matched by `selector`: its `href`, else its
/// text, resolved against `base` without fragment.
fn find_link(doc: &Document, selector: &str, base: &Url) -> Option<Url> {
    let first = doc.xpath(selector).ok()?.into_iter().next()?;
    let href = first
        .node
        .and_then(|id| doc.element(id))
        .and_then(|el| el.attr("href"))
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| first.value.trim())
        .to_string();
    if href.is_empty() {
        return None;
    }

    let mut url = base.join(&href).ok()?;
    url.set_fragment(None);
    Some(url)
}

/// String values of every node matched by `selectors`, in order.
fn match_values(doc: &Document, selectors: &[String]) -> Vec<String> {
    selectors
        .iter()
        .filter_map(|s| doc.xpath(s).ok())
        .flatten()
        .map(|m| m.value.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Resolves the site rules of the first drop.
///
/// Custom HTTP headers of the rules are set on the extractor client. At the
/// Dom step the rules are dropped again when the document is a media.
pub struct LoadConfiguration {
    loader: Arc<ConfigLoader>,
}

impl LoadConfiguration {
    pub fn new(loader: Arc<ConfigLoader>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl Processor for LoadConfiguration {
    fn name(&self) -> &'static str {
        "load_configuration"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() == Step::Dom && x.drop().is_some_and(|d| d.is_media()) {
            x.log().debug("removing site config (document is a media)", &[]);
            m.remove_value(CONFIG_KEY);
        }

        if m.position() > 0 || m.step() != Step::Start {
            return Flow::Continue;
        }
        let Some(url) = x.drop().map(|d| d.url.clone()) else {
            return Flow::Continue;
        };

        let config = match self.loader.load_for_url(&url) {
            Ok(config) => config,
            Err(err) => {
                x.log().error("load site config", &[("error", &err)]);
                return Flow::Continue;
            }
        };

        if config.files.is_empty() {
            x.log().debug("no site config found", &[]);
        } else {
            x.log().debug("site config loaded", &[("files", &config.files.join(", "))]);
        }

        for (name, value) in &config.http_headers {
            x.log().debug("site config custom header", &[("header", name)]);
            if let Err(err) = x.client_mut().set_header(name, value) {
                x.log().warn("invalid custom header", &[("error", &err)]);
            }
        }

        m.set_value(CONFIG_KEY, config);
        Flow::Continue
    }
}

/// Applies `replace_string` rules to the raw body.
pub struct ReplaceStrings;

#[async_trait]
impl Processor for ReplaceStrings {
    fn name(&self) -> &'static str {
        "replace_strings"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Body {
            return Flow::Continue;
        }
        let Some(config) = site_config(m) else {
            return Flow::Continue;
        };

        for (find, replace) in &config.replace_strings {
            if find.is_empty() {
                continue;
            }
            if let Some(d) = x.current_drop_mut(m) {
                d.body = d.body.replace(find.as_str(), replace);
            }
            x.log().debug("replace_string", &[("find", find), ("replace", replace)]);
        }
        Flow::Continue
    }
}

/// Replaces the body by the first node matching a `body` rule.
pub struct ExtractBody;

#[async_trait]
impl Processor for ExtractBody {
    fn name(&self) -> &'static str {
        "extract_body"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Dom {
            return Flow::Continue;
        }
        let (Some(config), Some(dom)) = (site_config(m), m.dom.as_mut()) else {
            return Flow::Continue;
        };

        let found = {
            let doc = dom.document();
            doc.body().and_then(|_| {
                config.body_selectors.iter().find_map(|selector| {
                    let el = doc.xpath_elements(selector).ok()?.into_iter().next()?;
                    Some((el.outer_html(), el.children().len()))
                })
            })
        };

        if let Some((html, nodes)) = found {
            x.log().debug("site config body found", &[("nodes", &nodes)]);
            dom.set_body(&format!(r#"<section class="article" id="article">{html}</section>"#));
        }
        Flow::Continue
    }
}

/// Adds the text of `author` rule matches to the first drop.
pub struct ExtractAuthor;

#[async_trait]
impl Processor for ExtractAuthor {
    fn name(&self) -> &'static str {
        "extract_author"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.position() > 0 || m.step() != Step::Dom {
            return Flow::Continue;
        }
        let (Some(config), Some(dom)) = (site_config(m), m.dom.as_ref()) else {
            return Flow::Continue;
        };

        let authors = match_values(&dom.document(), &config.author_selectors);
        for author in &authors {
            x.log().debug("site config author", &[("author", author)]);
        }
        if let Some(d) = x.drop_mut() {
            d.add_authors(&authors);
        }
        Flow::Continue
    }
}

/// Sets the date of the first drop from the first `date` rule match that
/// parses, unless a date is already known.
pub struct ExtractDate;

#[async_trait]
impl Processor for ExtractDate {
    fn name(&self) -> &'static str {
        "extract_date"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.position() > 0 || m.step() != Step::Dom {
            return Flow::Continue;
        }
        if x.drop().is_none_or(|d| d.date.is_some()) {
            return Flow::Continue;
        }
        let (Some(config), Some(dom)) = (site_config(m), m.dom.as_ref()) else {
            return Flow::Continue;
        };

        let date = match_values(&dom.document(), &config.date_selectors).iter().find_map(|v| parse_date(v));
        if let Some(date) = date {
            x.log().debug("site config date", &[("date", &date)]);
            if let Some(d) = x.drop_mut() {
                d.date = Some(date);
            }
        }
        Flow::Continue
    }
}

/// Removes nodes matched by the `strip`, `strip_id_or_class` and
/// `strip_image_src` rules.
pub struct StripTags;

impl StripTags {
    fn expressions(config: &SiteConfig) -> Vec<(&'static str, String, String)> {
        let mut expressions = Vec::new();
        for value in &config.strip_selectors {
            expressions.push(("strip", value.clone(), value.clone()));
        }
        for value in &config.strip_id_or_class {
            let literal = xpath_literal(value);
            let padded = xpath_literal(&format!(" {value} "));
            expressions.push((
                "strip_id_or_class",
                value.clone(),
                format!("//*[@id={literal} or contains(concat(' ',normalize-space(@class),' '),{padded})]"),
            ));
        }
        for value in &config.strip_image_src {
            expressions.push((
                "strip_image_src",
                value.clone(),
                format!("//img[contains(@src, {})]", xpath_literal(value)),
            ));
        }
        expressions
    }
}

#[async_trait]
impl Processor for StripTags {
    fn name(&self) -> &'static str {
        "strip_tags"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Dom {
            return Flow::Continue;
        }
        let (Some(config), Some(dom)) = (site_config(m), m.dom.as_mut()) else {
            return Flow::Continue;
        };

        let expressions = Self::expressions(&config);
        let counts: Vec<usize> = dom.edit(|doc, edits| {
            expressions
                .iter()
                .map(|(_, _, xpath)| {
                    let nodes = doc.xpath(xpath).unwrap_or_default();
                    nodes.iter().filter_map(|n| n.node).for_each(|id| edits.remove(id));
                    nodes.len()
                })
                .collect()
        });

        for ((kind, value, _), count) in expressions.iter().zip(counts) {
            x.log().debug(kind, &[("value", value), ("nodes", &count)]);
        }
        Flow::Continue
    }
}

/// Restarts the run on the single page version of an article.
pub struct FindContentPage;

#[async_trait]
impl Processor for FindContentPage {
    fn name(&self) -> &'static str {
        "find_content_page"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Dom {
            return Flow::Continue;
        }
        let (Some(config), Some(dom), Some(base)) =
            (site_config(m), m.dom.as_ref(), x.current_drop(m).map(|d| d.url.clone()))
        else {
            return Flow::Continue;
        };

        let links: Vec<Url> = {
            let doc = dom.document();
            config.single_page_link_selectors.iter().filter_map(|s| find_link(&doc, s, &base)).collect()
        };

        for url in links {
            if x.visited(&url) {
                x.log().debug("single page already visited", &[("url", &url)]);
                continue;
            }

            x.log().info("found single page link", &[("url", &url)]);
            if let Err(err) = x.replace_drop(&url) {
                x.log().error("cannot replace drop", &[("error", &err)]);
                return Flow::Continue;
            }
            m.position = -1;
            return Flow::Stop;
        }
        Flow::Continue
    }
}

/// Finds the next page link and stores it under [`NEXT_PAGE_KEY`].
pub struct FindNextPage;

#[async_trait]
impl Processor for FindNextPage {
    fn name(&self) -> &'static str {
        "find_next_page"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Dom {
            return Flow::Continue;
        }
        let (Some(config), Some(dom), Some(base)) =
            (site_config(m), m.dom.as_ref(), x.current_drop(m).map(|d| d.url.clone()))
        else {
            return Flow::Continue;
        };

        let next = {
            let doc = dom.document();
            config.next_page_link_selectors.iter().filter_map(|s| find_link(&doc, s, &base)).last()
        };

        if let Some(url) = next {
            x.log().debug("found next page", &[("url", &url)]);
            m.set_value(NEXT_PAGE_KEY, url);
        }
        Flow::Continue
    }
}

/// Queues the page found by [`FindNextPage`].
pub struct GoToNextPage;

#[async_trait]
impl Processor for GoToNextPage {
    fn name(&self) -> &'static str {
        "go_to_next_page"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Finish {
            return Flow::Continue;
        }
        let Some(url) = m.value::<Url>(NEXT_PAGE_KEY).cloned() else {
            return Flow::Continue;
        };

        if x.visited(&url) {
            x.log().debug("next page already visited", &[("url", &url)]);
            return Flow::Continue;
        }

        x.log().info("go to next page", &[("url", &url)]);
        x.add_drop(&url);
        m.remove_value(NEXT_PAGE_KEY);
        Flow::Continue
    }
}
