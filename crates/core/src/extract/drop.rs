use std::collections::BTreeMap;
use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::Serialize;
use time::OffsetDateTime;
use url::Url;

use super::picture::Picture;
use crate::decode::{charset_param, decode_html, media_type};
use crate::fetch::HttpClient;
use crate::{Result, ScrapbookError};

static RX_AUTHOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?i)by(\s*:)?\s+").expect("valid author regex"));
static RX_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid spaces regex"));

/// Collected metadata, each key holding every value found for it.
///
/// Keys are namespaced by source: `html.*`, `graph.*`, `twitter.*`,
/// `schema.*`, `dc.*`, `link.*`, `oembed.*`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DropMeta(BTreeMap<String, Vec<String>>);

impl DropMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value to `name`.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.0.entry(name.to_string()).or_default().push(value.into());
    }

    /// Values of the first name present.
    pub fn lookup(&self, names: &[&str]) -> &[String] {
        names.iter().find_map(|n| self.0.get(*n)).map(Vec::as_slice).unwrap_or_default()
    }

    /// First value of the first name present, or an empty string.
    pub fn lookup_get(&self, names: &[&str]) -> &str {
        self.lookup(names).first().map(String::as_str).unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}

/// One fetched resource and everything extracted from it.
#[derive(Debug, Clone, Serialize)]
pub struct Drop {
    pub url: Url,
    /// Registrable domain (eTLD+1) of the URL host.
    pub domain: String,
    pub content_type: String,
    pub charset: String,
    pub document_type: String,

    pub title: String,
    pub description: String,
    pub authors: Vec<String>,
    pub site: String,
    pub lang: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub date: Option<OffsetDateTime>,

    pub headers: BTreeMap<String, Vec<String>>,
    pub meta: DropMeta,
    #[serde(skip)]
    pub body: String,

    pub pictures: BTreeMap<String, Picture>,
}

impl Drop {
    /// A new, unloaded drop. The URL fragment is dropped.
    pub fn new(url: &Url) -> Self {
        let mut drop = Self {
            url: url.clone(),
            domain: String::new(),
            content_type: String::new(),
            charset: String::new(),
            document_type: String::new(),
            title: String::new(),
            description: String::new(),
            authors: Vec::new(),
            site: String::new(),
            lang: String::new(),
            date: None,
            headers: BTreeMap::new(),
            meta: DropMeta::new(),
            body: String::new(),
            pictures: BTreeMap::new(),
        };
        drop.set_url(url.clone());
        drop
    }

    fn set_url(&mut self, mut url: Url) {
        url.set_fragment(None);
        self.domain = url.host_str().map(registrable_domain).unwrap_or_default();
        self.url = url;
    }

    /// Host name of the drop URL, in its Unicode form.
    pub fn hostname(&self) -> String {
        self.url.host_str().map(unicode_host).unwrap_or_default()
    }

    /// The URL with a Unicode host.
    pub fn display_url(&self) -> String {
        let url = self.url.to_string();
        match self.url.host_str() {
            Some(host) => url.replacen(host, &unicode_host(host), 1),
            None => url,
        }
    }

    /// [`Drop::display_url`] with percent escapes decoded, for storage.
    ///
    /// Malformed escapes are kept as is; escapes that decode to invalid
    /// UTF-8 leave the whole URL encoded.
    pub fn unescaped_url(&self) -> String {
        let url = self.display_url();
        match percent_decode_str(&url).decode_utf8() {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => url,
        }
    }

    /// Fetch the resource unless a body is already present.
    ///
    /// # Errors
    ///
    /// Network failures and non 2xx statuses are returned as is. A drop
    /// loaded from a non HTML resource keeps an empty body.
    pub async fn load(&mut self, client: &HttpClient) -> Result<()> {
        if !self.body.is_empty() {
            self.site = self.hostname();
            self.content_type = "text/html".to_string();
            self.charset = "utf-8".to_string();
            return Ok(());
        }

        let response = client.send(client.get(&self.url)).await?;

        self.headers.clear();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                self.headers.entry(name.as_str().to_string()).or_default().push(value.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapbookError::InvalidStatus { status: status.as_u16() });
        }

        self.set_url(response.url().clone());
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.content_type = media_type(&content_type);
        self.site = self.hostname();

        if !self.is_html() {
            return Ok(());
        }

        let bytes = response.bytes().await?;
        let decoded = decode_html(&bytes, charset_param(&content_type).as_deref());
        self.charset = decoded.encoding.to_lowercase();
        self.body = decoded.text;
        Ok(())
    }

    pub fn is_html(&self) -> bool {
        self.content_type == "text/html" || self.content_type == "application/xhtml+xml"
    }

    pub fn is_media(&self) -> bool {
        matches!(self.document_type.as_str(), "photo" | "video" | "audio" | "music")
    }

    /// Add authors, ignoring case-insensitive duplicates. The list stays
    /// sorted.
    pub fn add_authors<S: AsRef<str>>(&mut self, values: &[S]) {
        for value in values {
            let value = RX_SPACES.replace_all(value.as_ref().trim(), " ");
            let value = RX_AUTHOR.replace(&value, "").into_owned();
            if value.is_empty() {
                continue;
            }
            let key = value.to_lowercase();
            if !self.authors.iter().any(|a| a.to_lowercase() == key) {
                self.authors.push(value);
            }
        }
        self.authors.sort();
    }
}

/// eTLD+1 of an ASCII host, or the host itself when it has none.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.');
    psl::domain_str(host).unwrap_or(host).to_string()
}

fn unicode_host(host: &str) -> String {
    let (unicode, result) = idna::domain_to_unicode(host);
    if result.is_ok() { unicode } else { host.to_string() }
}
