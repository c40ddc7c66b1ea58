//! Stylesheet rewriting.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use url::Url;

use super::html::RefKind;
use super::url::{RX_CSS_URL, absolute_url, css_token_value, sanitize_style_url};
use super::{Archiver, Fetched};
use crate::{Result, ScrapbookError};

impl Archiver {
    /// Resolve every `url()` of a stylesheet and replace it.
    ///
    /// References are resolved concurrently; the first download or
    /// processing failure aborts the others and fails the whole stylesheet.
    /// Skipped references, such as non-http(s) URLs, become absolute URLs.
    pub(super) async fn process_css(&self, css: String, base: Url, chain: Arc<Vec<String>>) -> Result<String> {
        let mut tokens: Vec<String> = RX_CSS_URL.find_iter(&css).map(|m| m.as_str().to_string()).collect();
        tokens.sort_unstable();
        tokens.dedup();
        if tokens.is_empty() {
            return Ok(css);
        }

        let mut tasks = JoinSet::new();
        for token in tokens {
            let this = self.clone();
            let base = base.clone();
            let chain = Arc::clone(&chain);
            tasks.spawn(async move {
                let value = RX_CSS_URL.captures(&token).map(|c| css_token_value(&c).to_string()).unwrap_or_default();
                let uri = absolute_url(sanitize_style_url(&value), &base);
                let replacement = match this.process_url(uri.clone(), base.to_string(), RefKind::Other, chain).await? {
                    Fetched::Asset(asset) => format!("url(\"{}\")", this.inner.url_processor.process(&uri, &asset)),
                    Fetched::Skipped => format!("url(\"{uri}\")"),
                };
                Ok::<_, ScrapbookError>((token, replacement))
            });
        }

        let mut replacements = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((token, replacement))) => {
                    replacements.insert(token, replacement);
                }
                Ok(Err(err)) => {
                    tasks.abort_all();
                    return Err(err);
                }
                Err(err) => {
                    tasks.abort_all();
                    return Err(ScrapbookError::ArchiveError(err.to_string()));
                }
            }
        }

        Ok(RX_CSS_URL
            .replace_all(&css, |caps: &regex::Captures<'_>| {
                replacements.get(&caps[0]).cloned().unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned())
    }
}
