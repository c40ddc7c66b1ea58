use async_trait::async_trait;
use serde_json::{Map, Value};
use url::Url;

use crate::dom::Dom;
use crate::extract::{Extractor, Flow, ProcessMessage, Processor, Step};
use crate::fetch::HttpClient;
use crate::{Result, ScrapbookError};

const OEMBED_FIELDS: &[&str] = &[
    "type",
    "version",
    "title",
    "author_name",
    "author_url",
    "provider_name",
    "provider_url",
    "cache_age",
    "thumbnail_url",
    "thumbnail_width",
    "thumbnail_height",
    "url",
    "width",
    "height",
    "html",
];

fn oembed_link(dom: &Dom, base: &Url) -> Option<Url> {
    let doc = dom.document();
    let link = doc.xpath_elements("//link[@href][@type='application/json+oembed']").ok()?.into_iter().next()?;
    let href = link.attr("href").map(str::trim).filter(|h| !h.is_empty())?;
    base.join(href).ok()
}

async fn fetch_oembed(client: &HttpClient, url: &Url) -> Result<Map<String, Value>> {
    let response = client.fetch(url).await?;
    let bytes = response.bytes().await?;
    match serde_json::from_slice(&bytes)? {
        Value::Object(map) => Ok(map),
        _ => Err(ScrapbookError::HtmlParseError(format!("oembed response is not an object ({url})"))),
    }
}

/// Loads the oEmbed document linked from the first drop into `oembed.*`
/// metadata.
///
/// Numeric values are kept as written in the JSON response.
pub struct ExtractOembed;

#[async_trait]
impl Processor for ExtractOembed {
    fn name(&self) -> &'static str {
        "extract_oembed"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Dom || m.position() > 0 {
            return Flow::Continue;
        }
        let (Some(dom), Some(base)) = (m.dom.as_ref(), x.drop().map(|d| d.url.clone())) else {
            return Flow::Continue;
        };

        x.log().debug("looking for oembed URL", &[]);
        let Some(url) = oembed_link(dom, &base) else {
            return Flow::Continue;
        };

        let client = x.client().clone();
        let values = match fetch_oembed(&client, &url).await {
            Ok(values) => values,
            Err(err) => {
                x.log().warn("oembed error", &[("error", &err)]);
                return Flow::Continue;
            }
        };
        x.log().debug("found oembed", &[("url", &url)]);

        let Some(d) = x.drop_mut() else {
            return Flow::Continue;
        };
        for name in OEMBED_FIELDS {
            let value = match values.get(*name) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => continue,
                Some(other) => other.to_string(),
            };
            if !value.is_empty() {
                d.meta.add(&format!("oembed.{name}"), value);
            }
        }
        Flow::Continue
    }
}
