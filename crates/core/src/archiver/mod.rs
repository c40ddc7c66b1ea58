//! Self-contained snapshots of HTML documents.
//!
//! The [`Archiver`] finds every resource a document references (images,
//! stylesheets, scripts, frames, media, depending on [`ArchiveFlags`]),
//! downloads them with bounded concurrency and replaces each reference with
//! the output of a [`UrlProcessor`], by default a `data:` URL.
//!
//! Downloaded assets are cached for the lifetime of the archiver: the same
//! absolute URL is only requested once, even when several documents or
//! stylesheets refer to it.
//!
//! # Example
//!
//! ```rust,no_run
//! use scrapbook_core::archiver::{ArchiveFlags, Archiver};
//! use scrapbook_core::fetch::{FetchConfig, HttpClient};
//! use url::Url;
//!
//! # async fn run() -> scrapbook_core::Result<()> {
//! let client = HttpClient::new(FetchConfig::default())?;
//! let archiver = Archiver::builder(client).flags(ArchiveFlags::IMAGES | ArchiveFlags::CSS).max_downloads(4).build();
//!
//! let base = Url::parse("https://example.net/post").unwrap();
//! let html = archiver.archive(r#"<img src="/cover.png">"#, &base).await?;
//! assert!(html.contains("data:image/png;base64,"));
//! # Ok(())
//! # }
//! ```

mod css;
mod events;
mod html;
mod url;

pub use events::{Event, EventLog, EventSink, TracingEvents};
pub use self::url::{absolute_url, clean_url, data_url, rewrite_srcset, sanitize_style_url, srcset_candidates};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{CONTENT_TYPE, REFERER};
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use ::url::Url;

use self::html::{RefKind, Replacements};
use self::url::is_skipped;
use crate::decode::{charset_param, decode_html, media_type};
use crate::fetch::HttpClient;
use crate::img::sniff_format;
use crate::{Result, ScrapbookError};

/// Default number of concurrent downloads.
pub const DEFAULT_MAX_DOWNLOADS: usize = 10;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Classes of resources to archive.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveFlags(u8);

impl ArchiveFlags {
    pub const CSS: Self = Self(1);
    pub const EMBEDS: Self = Self(1 << 1);
    pub const JS: Self = Self(1 << 2);
    pub const MEDIA: Self = Self(1 << 3);
    pub const IMAGES: Self = Self(1 << 4);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::CSS, "css"),
        (Self::EMBEDS, "embeds"),
        (Self::JS, "js"),
        (Self::MEDIA, "media"),
        (Self::IMAGES, "images"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b1_1111)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parse a flag name (`css`, `embeds`, `js`, `media`, `images`).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name.trim()))
            .map(|(flag, _)| *flag)
    }
}

impl Default for ArchiveFlags {
    fn default() -> Self {
        Self::IMAGES | Self::EMBEDS
    }
}

impl BitOr for ArchiveFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ArchiveFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ArchiveFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ArchiveFlags({})", names.join(" | "))
    }
}

/// A downloaded (and possibly rewritten) resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Transforms downloaded images before they are cached.
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    async fn process(&self, asset: Asset, uri: &Url) -> Result<Asset>;
}

/// Keeps images as downloaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

#[async_trait]
impl ImageProcessor for PassThrough {
    async fn process(&self, asset: Asset, _uri: &Url) -> Result<Asset> {
        Ok(asset)
    }
}

/// Produces the value replacing a resolved reference.
pub trait UrlProcessor: Send + Sync {
    fn process(&self, uri: &str, asset: &Asset) -> String;
}

/// Inlines assets as base64 `data:` URLs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataUrls;

impl UrlProcessor for DataUrls {
    fn process(&self, _uri: &str, asset: &Asset) -> String {
        data_url(&asset.content_type, &asset.data)
    }
}

impl<F> UrlProcessor for F
where
    F: Fn(&str, &Asset) -> String + Send + Sync,
{
    fn process(&self, uri: &str, asset: &Asset) -> String {
        self(uri, asset)
    }
}

fn is_fetchable(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty())
}

/// Outcome of a reference resolution.
pub(crate) enum Fetched {
    Asset(Asset),
    Skipped,
}

type Download = std::result::Result<Asset, String>;

enum Claim {
    Done(Asset),
    Shared(Arc<OnceCell<Download>>),
    Fresh(Arc<OnceCell<Download>>),
}

struct Inner {
    client: HttpClient,
    flags: ArchiveFlags,
    timeout: Duration,
    semaphore: Semaphore,
    image_processor: Arc<dyn ImageProcessor>,
    url_processor: Arc<dyn UrlProcessor>,
    events: Arc<dyn EventSink>,
    cache: RwLock<HashMap<String, Asset>>,
    downloads: Mutex<HashMap<String, Arc<OnceCell<Download>>>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Builder for [`Archiver`].
pub struct ArchiverBuilder {
    client: HttpClient,
    max_downloads: usize,
    timeout: Duration,
    flags: ArchiveFlags,
    image_processor: Arc<dyn ImageProcessor>,
    url_processor: Arc<dyn UrlProcessor>,
    events: Arc<dyn EventSink>,
}

impl ArchiverBuilder {
    pub fn max_downloads(mut self, max: usize) -> Self {
        self.max_downloads = max.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn flags(mut self, flags: ArchiveFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn image_processor(mut self, processor: Arc<dyn ImageProcessor>) -> Self {
        self.image_processor = processor;
        self
    }

    pub fn url_processor(mut self, processor: Arc<dyn UrlProcessor>) -> Self {
        self.url_processor = processor;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> Archiver {
        Archiver {
            inner: Arc::new(Inner {
                client: self.client,
                flags: self.flags,
                timeout: self.timeout,
                semaphore: Semaphore::new(self.max_downloads),
                image_processor: self.image_processor,
                url_processor: self.url_processor,
                events: self.events,
                cache: RwLock::new(HashMap::new()),
                downloads: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }
}

/// Rewrites documents into self-contained snapshots.
///
/// Cloning is cheap; clones share the cache and the download permits.
#[derive(Clone)]
pub struct Archiver {
    inner: Arc<Inner>,
}

impl fmt::Debug for Archiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archiver")
            .field("flags", &self.inner.flags)
            .field("timeout", &self.inner.timeout)
            .field("cached", &self.inner.cache.read().len())
            .finish()
    }
}

impl Archiver {
    pub fn builder(client: HttpClient) -> ArchiverBuilder {
        ArchiverBuilder {
            client,
            max_downloads: DEFAULT_MAX_DOWNLOADS,
            timeout: DEFAULT_TIMEOUT,
            flags: ArchiveFlags::default(),
            image_processor: Arc::new(PassThrough),
            url_processor: Arc::new(DataUrls),
            events: Arc::new(TracingEvents),
        }
    }

    pub fn new(client: HttpClient) -> Self {
        Self::builder(client).build()
    }

    pub fn flags(&self) -> ArchiveFlags {
        self.inner.flags
    }

    /// A cached asset.
    pub fn asset(&self, uri: &str) -> Option<Asset> {
        self.inner.cache.read().get(uri).cloned()
    }

    /// Every cached asset, sorted by URL.
    pub fn assets(&self) -> Vec<(String, Asset)> {
        let mut assets: Vec<(String, Asset)> =
            self.inner.cache.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        assets.sort_by(|a, b| a.0.cmp(&b.0));
        assets
    }

    /// Highest number of downloads seen in flight at the same time.
    pub fn peak_downloads(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Archive `html`, resolving its references against `base`.
    ///
    /// Failed resources never fail the document: their reference is made
    /// absolute and an [`Event::Error`] is sent. References that are not
    /// http(s) URLs are left alone with an [`Event::Skip`].
    pub async fn archive(&self, html: &str, base: &Url) -> Result<String> {
        self.emit(Event::StartHtml { uri: base.to_string() });
        let chain = Arc::new(vec![base.to_string()]);
        self.process_html(html.to_string(), base.clone(), chain).await
    }

    fn emit(&self, event: Event) {
        self.inner.events.send(&event);
    }

    async fn process_html(&self, html: String, base: Url, chain: Arc<Vec<String>>) -> Result<String> {
        let found = html::discover(&html, self.inner.flags)?;

        enum Resolved {
            Ref((String, RefKind), String),
            Style(String, String),
        }

        let mut tasks = JoinSet::new();
        let mut seen = HashSet::new();
        for (value, kind) in found.refs {
            if !seen.insert((value.clone(), kind)) {
                continue;
            }
            let this = self.clone();
            let base = base.clone();
            let chain = Arc::clone(&chain);
            tasks.spawn(async move {
                let replacement = this.replace_ref(&value, kind, &base, chain).await;
                Resolved::Ref((value, kind), replacement)
            });
        }

        let styles: HashSet<String> = found.styles.into_iter().collect();
        for css in styles {
            let this = self.clone();
            let base = base.clone();
            let chain = Arc::clone(&chain);
            tasks.spawn(async move {
                match this.process_css(css.clone(), base.clone(), chain).await {
                    Ok(new) => Resolved::Style(css, new),
                    Err(err) => {
                        this.emit(Event::Error { error: err.to_string(), uri: base.to_string() });
                        Resolved::Style(css.clone(), css)
                    }
                }
            });
        }

        let mut replacements = Replacements::default();
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(|e| ScrapbookError::ArchiveError(e.to_string()))? {
                Resolved::Ref(key, value) => {
                    replacements.refs.insert(key, value);
                }
                Resolved::Style(css, value) => {
                    replacements.styles.insert(css, value);
                }
            }
        }

        html::rewrite(&html, self.inner.flags, &replacements)
    }

    async fn replace_ref(&self, value: &str, kind: RefKind, base: &Url, chain: Arc<Vec<String>>) -> String {
        let uri = absolute_url(value, base);
        match self.process_url(uri.clone(), base.to_string(), kind, chain).await {
            Ok(Fetched::Asset(asset)) => self.inner.url_processor.process(&uri, &asset),
            Ok(Fetched::Skipped) if is_skipped(value) => value.to_string(),
            Ok(Fetched::Skipped) | Err(_) => uri,
        }
    }

    /// Resolve one absolute reference: cache lookup, download, then
    /// processing according to the content type.
    pub(crate) fn process_url(
        &self,
        uri: String,
        parent: String,
        kind: RefKind,
        chain: Arc<Vec<String>>,
    ) -> BoxFuture<'static, Result<Fetched>> {
        let this = self.clone();
        async move {
            let uri = uri.trim().to_string();
            if is_skipped(&uri) || chain.contains(&uri) {
                this.emit(Event::Skip { uri });
                return Ok(Fetched::Skipped);
            }

            let url = match Url::parse(&uri) {
                Ok(url) if is_fetchable(&url) => url,
                _ => {
                    this.emit(Event::Skip { uri });
                    return Ok(Fetched::Skipped);
                }
            };

            let cached = this.inner.cache.read().get(&uri).cloned();
            if let Some(asset) = cached {
                this.emit(Event::FetchUrl { uri, parent, cached: true });
                return Ok(Fetched::Asset(asset));
            }

            let (cell, shared) = match this.claim(&url, &uri) {
                Claim::Done(asset) => {
                    this.emit(Event::FetchUrl { uri, parent, cached: true });
                    return Ok(Fetched::Asset(asset));
                }
                Claim::Shared(cell) => (cell, true),
                Claim::Fresh(cell) => (cell, false),
            };

            this.emit(Event::FetchUrl { uri: uri.clone(), parent: parent.clone(), cached: shared });
            match this.load(&url, &parent, kind, chain, cell).await {
                Ok(asset) => {
                    let asset = this.inner.cache.write().entry(uri.clone()).or_insert(asset).clone();
                    this.inner.downloads.lock().remove(url.as_str());
                    Ok(Fetched::Asset(asset))
                }
                Err(err) => {
                    this.emit(Event::Error { error: err.to_string(), uri });
                    Err(err)
                }
            }
        }
        .boxed()
    }

    /// Join the download of `url` if one is running, or register a new one.
    ///
    /// The cache is checked again under the downloads lock: a download that
    /// finished since the first lookup has its asset cached before its cell
    /// is dropped.
    fn claim(&self, url: &Url, uri: &str) -> Claim {
        let mut downloads = self.inner.downloads.lock();
        if let Some(cell) = downloads.get(url.as_str()) {
            return Claim::Shared(Arc::clone(cell));
        }
        if let Some(asset) = self.inner.cache.read().get(uri).cloned() {
            return Claim::Done(asset);
        }
        let cell: Arc<OnceCell<Download>> = Arc::default();
        downloads.insert(url.to_string(), Arc::clone(&cell));
        Claim::Fresh(cell)
    }

    async fn load(
        &self,
        url: &Url,
        parent: &str,
        kind: RefKind,
        chain: Arc<Vec<String>>,
        cell: Arc<OnceCell<Download>>,
    ) -> Result<Asset> {
        let Asset { data, content_type } = self.download(url, parent, &cell).await?;
        let mut chain = (*chain).clone();
        chain.push(url.to_string());
        let chain = Arc::new(chain);

        let asset = match media_type(&content_type).as_str() {
            "text/html" if kind == RefKind::Embed => {
                let text = decode_html(&data, charset_param(&content_type).as_deref()).text;
                let html = self.process_html(text, url.clone(), chain).await?;
                Asset { data: html.into_bytes(), content_type: "text/html; charset=utf-8".to_string() }
            }
            "text/css" => {
                let text = String::from_utf8_lossy(&data).into_owned();
                let css = self.process_css(text, url.clone(), chain).await?;
                Asset { data: css.into_bytes(), content_type }
            }
            m if m.starts_with("image/") => {
                self.inner
                    .image_processor
                    .process(Asset { data, content_type }, url)
                    .await?
            }
            _ => Asset { data, content_type },
        };

        if kind == RefKind::Image && sniff_format(&asset.data).is_none() {
            return Err(ScrapbookError::ArchiveError("not an image".to_string()));
        }
        Ok(asset)
    }

    /// Download a URL once, sharing the result with every holder of `cell`.
    async fn download(&self, url: &Url, parent: &str, cell: &OnceCell<Download>) -> Result<Asset> {
        let result = cell
            .get_or_init(|| async {
                let _permit = self.inner.semaphore.acquire().await.map_err(|e| e.to_string())?;
                let current = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.inner.peak.fetch_max(current, Ordering::SeqCst);
                let result = self.get(url, parent).await;
                self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
                result.map_err(|e| e.to_string())
            })
            .await;
        result.clone().map_err(ScrapbookError::ArchiveError)
    }

    async fn get(&self, url: &Url, parent: &str) -> Result<Asset> {
        let request = self.inner.client.get(url).timeout(self.inner.timeout).header(REFERER, parent);
        let response = self.inner.client.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapbookError::InvalidStatus { status: status.as_u16() });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("text/plain")
            .to_string();
        let data = response.bytes().await?.to_vec();
        Ok(Asset { data, content_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchConfig;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::RgbImage::new(2, 2).write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn builder() -> ArchiverBuilder {
        Archiver::builder(HttpClient::new(FetchConfig::default()).unwrap())
    }

    async fn serve(server: &MockServer, route: &str, body: Vec<u8>, mime: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, mime))
            .mount(server)
            .await;
    }

    #[test]
    fn test_flags() {
        let flags = ArchiveFlags::default();
        assert!(flags.contains(ArchiveFlags::IMAGES));
        assert!(flags.contains(ArchiveFlags::EMBEDS));
        assert!(!flags.contains(ArchiveFlags::CSS));
        assert_eq!(format!("{flags:?}"), "ArchiveFlags(embeds | images)");
        assert_eq!(ArchiveFlags::from_name("JS"), Some(ArchiveFlags::JS));
        assert_eq!(ArchiveFlags::from_name("fonts"), None);
        assert!(ArchiveFlags::all().contains(ArchiveFlags::MEDIA | ArchiveFlags::CSS));
    }

    #[tokio::test]
    async fn test_archive_images() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(png(), "image/png"))
            .expect(1)
            .mount(&server)
            .await;

        let base = Url::parse(&format!("{}/post/", server.uri())).unwrap();
        let archiver = builder().build();
        let html = archiver
            .archive(r#"<p><img src="/a.png"><img src="../a.png#x" alt="again"></p>"#, &base)
            .await
            .unwrap();

        assert_eq!(html.matches("src=\"data:image/png;base64,").count(), 2, "{html}");
        assert_eq!(archiver.assets().len(), 1);
        assert_eq!(archiver.peak_downloads(), 1);
    }

    #[tokio::test]
    async fn test_archive_not_an_image() {
        let server = MockServer::start().await;
        serve(&server, "/fake.png", b"<html>login</html>".to_vec(), "image/png").await;

        let events = Arc::new(EventLog::new());
        let archiver = builder().events(events.clone()).build();
        let base = Url::parse(&server.uri()).unwrap();
        let html = archiver.archive(r#"<img src="fake.png">"#, &base).await.unwrap();

        assert_eq!(html, format!(r#"<img src="{}/fake.png">"#, server.uri()));
        assert!(archiver.assets().is_empty());
        assert_eq!(events.errors(), 1);
        assert!(events.lines().iter().any(|l| l.ends_with("not an image")));
    }

    #[tokio::test]
    async fn test_archive_skipped_references() {
        let server = MockServer::start().await;
        let base = Url::parse(&server.uri()).unwrap();
        let html = r##"<img src="data:image/gif;base64,R0lGOD"><img src="#top"><img src="">"##;

        let archiver = builder().build();
        assert_eq!(archiver.archive(html, &base).await.unwrap(), html);
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_archive_stylesheets() {
        let server = MockServer::start().await;
        let css = "body { background: url(img/bg.png) } i { background: url('data:image/gif;base64,R0') }";
        serve(&server, "/css/site.css", css.as_bytes().to_vec(), "text/css").await;
        serve(&server, "/css/img/bg.png", png(), "image/png").await;
        serve(&server, "/font.woff", b"font".to_vec(), "font/woff").await;

        let archiver = builder()
            .flags(ArchiveFlags::CSS | ArchiveFlags::IMAGES)
            .url_processor(Arc::new(|uri: &str, _: &Asset| format!("local:{uri}")))
            .build();
        let base = Url::parse(&server.uri()).unwrap();
        let html = archiver
            .archive(
                concat!(
                    r#"<link rel="stylesheet" href="/css/site.css">"#,
                    r#"<style>@font-face { src: url("/font.woff") }</style>"#
                ),
                &base,
            )
            .await
            .unwrap();

        let root = server.uri();
        assert!(html.contains(&format!(r#"href="local:{root}/css/site.css""#)), "{html}");
        assert!(html.contains(&format!(r#"src: url("local:{root}/font.woff")"#)));

        let sheet = archiver.asset(&format!("{root}/css/site.css")).unwrap();
        let sheet = String::from_utf8(sheet.data).unwrap();
        assert!(sheet.contains(&format!(r#"url("local:{root}/css/img/bg.png")"#)), "{sheet}");
        assert!(sheet.contains(r#"url("data:image/gif;base64,R0")"#));
    }

    #[tokio::test]
    async fn test_archive_failed_stylesheet() {
        let server = MockServer::start().await;
        serve(&server, "/site.css", b"a { background: url(missing.png) }".to_vec(), "text/css").await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let archiver = builder().flags(ArchiveFlags::all()).build();
        let base = Url::parse(&server.uri()).unwrap();
        let html = archiver
            .archive(r#"<link rel="stylesheet" href="site.css">"#, &base)
            .await
            .unwrap();

        assert_eq!(html, format!(r#"<link rel="stylesheet" href="{}/site.css">"#, server.uri()));
        assert!(archiver.asset(&format!("{}/site.css", server.uri())).is_none());
    }

    #[tokio::test]
    async fn test_archive_stylesheet_unfetchable_reference() {
        let server = MockServer::start().await;
        serve(&server, "/a.png", png(), "image/png").await;

        let events = Arc::new(EventLog::new());
        let archiver = builder()
            .flags(ArchiveFlags::CSS | ArchiveFlags::IMAGES)
            .events(events.clone())
            .build();
        let base = Url::parse(&server.uri()).unwrap();
        let html = archiver
            .archive("<style>a { background: url(/a.png) } b { behavior: url(about:blank) }</style>", &base)
            .await
            .unwrap();

        assert!(html.contains(r#"background: url("data:image/png;base64,"#), "{html}");
        assert!(html.contains(r#"behavior: url("about:blank")"#), "{html}");
        assert_eq!(events.errors(), 0);
        assert!(events.lines().contains(&"[DEBU] archiver: skip about:blank".to_string()));
    }

    #[tokio::test]
    async fn test_archive_shared_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(png(), "image/png")
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let events = Arc::new(EventLog::new());
        let archiver = builder().events(events.clone()).build();
        let base = Url::parse(&server.uri()).unwrap();
        let html = archiver
            .archive(r#"<img src="/a.png"><img src="a.png#top"><img src="./a.png?utm_source=feed">"#, &base)
            .await
            .unwrap();
        assert_eq!(html.matches("data:image/png;base64,").count(), 3, "{html}");

        let fetched = format!("{}/a.png (from", server.uri());
        let cached = format!("{}/a.png (cached)", server.uri());
        let lines = events.lines();
        assert_eq!(lines.iter().filter(|l| l.contains(&fetched)).count(), 1, "{lines:#?}");
        assert_eq!(lines.iter().filter(|l| l.contains(&cached)).count(), 2, "{lines:#?}");
    }

    #[tokio::test]
    async fn test_archive_embedded_document() {
        let server = MockServer::start().await;
        let frame = r#"<html><body><img src="/a.png"><iframe src="/frame.html"></iframe></body></html>"#;
        serve(&server, "/frame.html", frame.as_bytes().to_vec(), "text/html; charset=utf-8").await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(png(), "image/png"))
            .expect(1)
            .mount(&server)
            .await;

        let archiver = builder().build();
        let base = Url::parse(&server.uri()).unwrap();
        let html = archiver
            .archive(r#"<img src="/a.png"><iframe src="/frame.html"></iframe>"#, &base)
            .await
            .unwrap();

        assert!(html.contains(r#"<iframe src="data:text/html; charset=utf-8;base64,"#), "{html}");
        let embedded = archiver.asset(&format!("{}/frame.html", server.uri())).unwrap();
        let embedded = String::from_utf8(embedded.data).unwrap();
        assert!(embedded.contains("src=\"data:image/png;base64,"));
        assert!(embedded.contains(&format!(r#"<iframe src="{}/frame.html">"#, server.uri())));
    }

    #[tokio::test]
    async fn test_max_downloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(png(), "image/png")
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;

        let archiver = builder().max_downloads(2).build();
        let base = Url::parse(&server.uri()).unwrap();
        let html: String = (0..8).map(|i| format!(r#"<img src="/{i}.png">"#)).collect();
        let out = archiver.archive(&html, &base).await.unwrap();

        assert_eq!(out.matches("data:image/png").count(), 8);
        assert_eq!(archiver.peak_downloads(), 2);
        assert_eq!(server.received_requests().await.unwrap().len(), 8);
    }
}
