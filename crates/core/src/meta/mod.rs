//! Metadata processors.
//!
//! These run on the first drop only, at the Dom step. [`ExtractMeta`] fills
//! the drop [`DropMeta`] from the document head; [`ExtractOembed`] adds the
//! `oembed.*` values; [`SetDropProperties`] derives the date and document
//! type; [`ExtractFavicon`] and [`ExtractPicture`] load the drop pictures.

mod favicon;
mod oembed;
mod picture;

pub use favicon::ExtractFavicon;
pub use oembed::ExtractOembed;
pub use picture::ExtractPicture;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::dom::{Document, Dom, strip_html};
use crate::extract::{DropMeta, Extractor, Flow, ProcessMessage, Processor, Step, parse_date};
use crate::xpath::XPathMatch;

static RX_OPENGRAPH_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:]*:)?(.+?)(\..*|$)").expect("valid opengraph type regex"));

const DESCRIPTION_WORDS: usize = 60;

/// How a metadata entry is read from a matched node.
enum Field {
    /// A fixed name and the node text.
    Text(&'static str),
    /// Name and value from two attributes; `skip` bytes are cut from the name.
    Attr { name: &'static str, value: &'static str, skip: usize },
}

struct Spec {
    prefix: &'static str,
    selector: &'static str,
    field: Field,
}

const SPECS: &[Spec] = &[
    Spec { prefix: "html", selector: "//title", field: Field::Text("title") },
    Spec { prefix: "html", selector: "/html[@lang]/@lang", field: Field::Text("lang") },
    Spec {
        prefix: "html",
        selector: "//meta[@content][@name='author' or @name='byl' or @name='copyright' or @name='date' \
                   or @name='description' or @name='keywords' or @name='language' or @name='subtitle']",
        field: Field::Attr { name: "name", value: "content", skip: 0 },
    },
    // Dublin Core
    Spec {
        prefix: "dc",
        selector: "//meta[@content][starts-with(@name, 'DC.') or starts-with(@name, 'dc.')]",
        field: Field::Attr { name: "name", value: "content", skip: 3 },
    },
    // OpenGraph
    Spec {
        prefix: "graph",
        selector: "//meta[@content][starts-with(@property, 'og:')]",
        field: Field::Attr { name: "property", value: "content", skip: 3 },
    },
    // Twitter cards
    Spec {
        prefix: "twitter",
        selector: "//meta[@content][starts-with(@name, 'twitter:')]",
        field: Field::Attr { name: "name", value: "content", skip: 8 },
    },
    // schema.org
    Spec {
        prefix: "schema",
        selector: "//meta[@content][@itemprop]",
        field: Field::Attr { name: "itemprop", value: "content", skip: 0 },
    },
    Spec {
        prefix: "schema",
        selector: "//*[contains(concat(' ',normalize-space(@itemprop),' '),' author ')]\
                   //*[contains(concat(' ',normalize-space(@itemprop),' '),' name ')]",
        field: Field::Text("author"),
    },
    // Header links, without icons and stylesheets
    Spec {
        prefix: "link",
        selector: "//link[@href][@rel][not(contains(@rel, 'icon')) and not(contains(@rel, 'stylesheet'))]",
        field: Field::Attr { name: "rel", value: "href", skip: 0 },
    },
];

impl Field {
    fn read(&self, doc: &Document, found: &XPathMatch) -> Option<(String, String)> {
        match self {
            Field::Text(name) => Some((name.to_string(), found.value.clone())),
            Field::Attr { name, value, skip } => {
                let el = found.node.and_then(|id| doc.element(id))?;
                let name = el.attr(name)?.get(*skip..)?.trim().to_string();
                let value = strip_html(el.attr(value)?.trim());
                Some((name, value))
            }
        }
    }
}

/// Collect every metadata entry of a document.
pub fn parse_meta(doc: &Document) -> DropMeta {
    let mut meta = DropMeta::new();

    for spec in SPECS {
        let Ok(found) = doc.xpath(spec.selector) else {
            continue;
        };
        for m in &found {
            let Some((name, value)) = spec.field.read(doc, m) else {
                continue;
            };
            let (name, value) = (name.trim(), value.trim());
            if name.is_empty() || value.is_empty() {
                continue;
            }
            meta.add(&format!("{}.{}", spec.prefix, name), value);
        }
    }

    parse_json_ld(doc, &mut meta);
    meta
}

/// Add the author names, headline and publication date of JSON-LD blocks.
fn parse_json_ld(doc: &Document, meta: &mut DropMeta) {
    let Ok(scripts) = doc.select(r#"script[type="application/ld+json"]"#) else {
        return;
    };

    for script in scripts {
        let Ok(value) = serde_json::from_str::<Value>(script.text().trim()) else {
            continue;
        };

        let mut items: Vec<&Value> = match &value {
            Value::Array(list) => list.iter().collect(),
            other => vec![other],
        };
        if let Some(Value::Array(graph)) = value.get("@graph") {
            items.extend(graph.iter());
        }

        for item in items {
            for name in item.get("author").map(json_ld_names).unwrap_or_default() {
                meta.add("schema.author", name);
            }
            for key in ["headline", "datePublished"] {
                if let Some(v) = item.get(key).and_then(Value::as_str).map(str::trim).filter(|v| !v.is_empty()) {
                    meta.add(&format!("schema.{key}"), v);
                }
            }
        }
    }
}

/// Names of a JSON-LD author, given as a string, an object or a list.
fn json_ld_names(author: &Value) -> Vec<String> {
    match author {
        Value::String(name) if !name.trim().is_empty() => vec![name.trim().to_string()],
        Value::Object(obj) => obj.get("name").map(json_ld_names).unwrap_or_default(),
        Value::Array(list) => list.iter().flat_map(json_ld_names).collect(),
        _ => Vec::new(),
    }
}

fn short_description(description: &str) -> String {
    let words: Vec<&str> = description.split(' ').collect();
    if words.len() > DESCRIPTION_WORDS {
        format!("{}...", words[..DESCRIPTION_WORDS].join(" "))
    } else {
        description.to_string()
    }
}

fn load_meta(dom: &Dom) -> DropMeta {
    parse_meta(&dom.document())
}

/// Fills the first drop metadata and its title, description, authors, site
/// and language.
pub struct ExtractMeta;

#[async_trait]
impl Processor for ExtractMeta {
    fn name(&self) -> &'static str {
        "extract_meta"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Dom || m.position() > 0 {
            return Flow::Continue;
        }
        let Some(dom) = m.dom.as_ref() else {
            return Flow::Continue;
        };

        x.log().debug("loading metadata", &[]);
        let meta = load_meta(dom);
        let count = meta.len();
        let Some(d) = x.drop_mut() else {
            return Flow::Continue;
        };

        d.title = meta.lookup_get(&["graph.title", "twitter.title", "html.title"]).to_string();
        d.description = short_description(meta.lookup_get(&[
            "graph.description",
            "twitter.description",
            "html.description",
        ]));

        let authors = meta.lookup(&["schema.author", "dc.creator", "html.author", "html.byl"]).to_vec();
        d.add_authors(&authors);

        let site = meta.lookup_get(&["graph.site_name", "schema.name"]);
        if !site.is_empty() {
            d.site = site.to_string();
        }

        let lang: String = meta.lookup_get(&["html.lang", "html.language"]).chars().take(2).collect();
        d.lang = if lang.chars().count() < 2 { String::new() } else { lang };

        d.meta = meta;
        x.log().debug("metadata loaded", &[("count", &count)]);
        Flow::Continue
    }
}

/// Derives the publication date and document type of the first drop.
///
/// Runs after [`ExtractMeta`] and [`ExtractOembed`].
pub struct SetDropProperties;

#[async_trait]
impl Processor for SetDropProperties {
    fn name(&self) -> &'static str {
        "set_drop_properties"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Dom || m.position() > 0 {
            return Flow::Continue;
        }
        let Some(d) = x.drop_mut() else {
            return Flow::Continue;
        };

        d.date = parse_date(d.meta.lookup_get(&["html.date", "schema.datePublished"]));

        if d.document_type.is_empty() {
            let og_type = d.meta.lookup_get(&["graph.type"]);
            if !og_type.is_empty() {
                d.document_type = RX_OPENGRAPH_TYPE.replace(og_type, "$2").into_owned();
            }
        }

        if d.authors.is_empty() {
            let authors = d.meta.lookup(&["oembed.author_name"]).to_vec();
            d.add_authors(&authors);
        }

        if d.site.is_empty() || d.site == d.hostname() {
            let provider = d.meta.lookup_get(&["oembed.provider_name"]);
            if !provider.is_empty() {
                d.site = provider.to_string();
            }
        }

        let oembed_type = d.meta.lookup_get(&["oembed.type"]).to_string();
        if d.document_type == "photo" || oembed_type == "photo" {
            d.document_type = "photo".to_string();
            if oembed_type == "photo" {
                let url = d.meta.lookup_get(&["oembed.url"]).to_string();
                d.meta.add("x.picture_url", url);
            }
        }
        if oembed_type == "video" {
            d.document_type = oembed_type;
        }

        if !matches!(d.document_type.as_str(), "article" | "photo" | "video") {
            d.document_type = "article".to_string();
        }

        let document_type = d.document_type.clone();
        x.log().info("document type", &[("type", &document_type)]);
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use time::macros::datetime;

    const PAGE: &str = r#"<!DOCTYPE html>
<html lang="en-US">
<head>
    <title>HTML Title</title>
    <meta name="description" content="A <b>short</b> description">
    <meta name="author" content="Jane Roe">
    <meta name="date" content="2023-10-05">
    <meta name="DC.creator" content="Dublin Author">
    <meta property="og:title" content="OG Title">
    <meta property="og:type" content="og:video.movie">
    <meta property="og:site_name" content="Example Site">
    <meta property="og:image" content="/image.png">
    <meta name="twitter:title" content="Twitter Title">
    <meta itemprop="name" content="Schema Name">
    <link rel="icon" href="/icon.png">
    <link rel="stylesheet" href="/style.css">
    <link rel="canonical" href="https://example.net/canonical">
    <script type="application/ld+json">
    {"@context": "https://schema.org", "@type": "Article", "headline": "LD Headline",
     "datePublished": "2024-01-15T10:30:00Z", "author": [{"name": "John Doe"}, "Alice"]}
    </script>
</head>
<body>
    <div itemprop="author" itemscope><span itemprop="name">Inline Author</span></div>
    <p>Content</p>
</body>
</html>"#;

    async fn extract(html: &str) -> Extractor {
        let mut ex = Extractor::new("https://example.net/article").unwrap().with_html(html);
        ex.add_processors([Arc::new(ExtractMeta) as Arc<dyn Processor>, Arc::new(SetDropProperties)]);
        ex.run().await;
        ex
    }

    #[test]
    fn test_parse_meta() {
        let meta = parse_meta(&Document::parse(PAGE));

        assert_eq!(meta.lookup(&["html.title"]), ["HTML Title"]);
        assert_eq!(meta.lookup(&["html.lang"]), ["en-US"]);
        assert_eq!(meta.lookup(&["html.description"]), ["A short description"]);
        assert_eq!(meta.lookup(&["dc.creator"]), ["Dublin Author"]);
        assert_eq!(meta.lookup(&["graph.title"]), ["OG Title"]);
        assert_eq!(meta.lookup(&["twitter.title"]), ["Twitter Title"]);
        assert_eq!(meta.lookup(&["schema.name"]), ["Schema Name"]);
        assert_eq!(meta.lookup(&["schema.author"]), ["Inline Author", "John Doe", "Alice"]);
        assert_eq!(meta.lookup(&["schema.headline"]), ["LD Headline"]);
        assert_eq!(meta.lookup(&["link.canonical"]), ["https://example.net/canonical"]);
        assert!(!meta.contains("link.icon"));
        assert!(!meta.contains("link.stylesheet"));
    }

    #[test]
    fn test_json_ld_graph() {
        let html = r#"<script type="application/ld+json">
            {"@graph": [{"@type": "WebPage"}, {"@type": "NewsArticle", "author": {"name": "Graph Author"}}]}
        </script>"#;
        let meta = parse_meta(&Document::parse(html));
        assert_eq!(meta.lookup(&["schema.author"]), ["Graph Author"]);
    }

    #[test]
    fn test_short_description() {
        let long = vec!["word"; 70].join(" ");
        let short = short_description(&long);
        assert!(short.ends_with("word..."));
        assert_eq!(short.split(' ').count(), 60);
        assert_eq!(short_description("a b c"), "a b c");
    }

    #[tokio::test]
    async fn test_extract_meta() {
        let ex = extract(PAGE).await;
        let d = ex.drop().unwrap();

        assert_eq!(d.title, "OG Title");
        assert_eq!(d.description, "A short description");
        assert_eq!(d.authors, vec!["Alice", "Inline Author", "John Doe"]);
        assert_eq!(d.site, "Example Site");
        assert_eq!(d.lang, "en");
        assert_eq!(d.date, Some(datetime!(2023-10-05 0:00 UTC)));
        assert_eq!(d.document_type, "video");
    }

    #[tokio::test]
    async fn test_drop_properties_defaults() {
        let ex = extract("<html lang=\"f\"><head><title>T</title></head><body></body></html>").await;
        let d = ex.drop().unwrap();

        assert_eq!(d.title, "T");
        assert_eq!(d.lang, "");
        assert_eq!(d.site, "example.net");
        assert_eq!(d.date, None);
        assert_eq!(d.document_type, "article");
        assert!(ex.logs().iter().any(|l| l == "[INFO] document type type=\"article\""));
    }

    #[tokio::test]
    async fn test_drop_properties_oembed_photo() {
        let mut ex = Extractor::new("https://example.net/p/1").unwrap().with_html("<p>x</p>");
        {
            let d = ex.drop_mut().unwrap();
            d.meta.add("oembed.type", "photo");
            d.meta.add("oembed.url", "https://cdn.example.net/1.jpg");
            d.meta.add("oembed.author_name", "Photographer");
            d.meta.add("oembed.provider_name", "Photo Site");
        }
        ex.add_processors([Arc::new(SetDropProperties) as Arc<dyn Processor>]);
        ex.run().await;

        let d = ex.drop().unwrap();
        assert_eq!(d.document_type, "photo");
        assert_eq!(d.authors, vec!["Photographer"]);
        assert_eq!(d.site, "Photo Site");
        assert_eq!(d.meta.lookup_get(&["x.picture_url"]), "https://cdn.example.net/1.jpg");
    }
}
