//! Multi-page extraction state machine.
//!
//! An [`Extractor`] owns a growing list of [`Drop`]s, starting with the one
//! for the requested URL. Each drop goes through the [`Step`]s Start, Body,
//! Dom (HTML only) and Finish; every step runs the ordered processor chain.
//! Processors can rewrite the drop, add more drops (pagination), replace the
//! first one, or cancel the run. Once every drop is done the bodies are
//! concatenated and the PostProcess step runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use scrapbook_core::extract::{Extractor, Flow, ProcessMessage, Processor, Step};
//!
//! struct Shout;
//!
//! #[async_trait]
//! impl Processor for Shout {
//!     fn name(&self) -> &'static str {
//!         "shout"
//!     }
//!
//!     async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
//!         if m.step() == Step::Body {
//!             if let Some(d) = x.current_drop_mut(m) {
//!                 d.body = d.body.to_uppercase();
//!             }
//!         }
//!         Flow::Continue
//!     }
//! }
//!
//! # async fn run() -> scrapbook_core::Result<()> {
//! let mut ex = Extractor::new("https://example.net/")?.with_html("<p>hello</p>");
//! ex.add_processors([Arc::new(Shout) as Arc<dyn Processor>]);
//! ex.run().await;
//! assert!(ex.html().contains("HELLO"));
//! # Ok(())
//! # }
//! ```

mod date;
mod drop;
mod log;
mod picture;

pub use date::parse_date;
pub use drop::{Drop, DropMeta, registrable_domain};
pub use log::{Field, RunLog};
pub use picture::Picture;

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::dom::Dom;
use crate::fetch::{FetchConfig, HttpClient};
use crate::img::Transcoder;
use crate::{Result, ScrapbookError};

/// A lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Before the drop is fetched.
    Start,
    /// After the body was received.
    Body,
    /// With the parsed document in [`ProcessMessage::dom`].
    Dom,
    /// At the end of each drop.
    Finish,
    /// Once, after every drop.
    PostProcess,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Start => "start",
            Step::Body => "body",
            Step::Dom => "dom",
            Step::Finish => "finish",
            Step::PostProcess => "postprocess",
        };
        f.write_str(name)
    }
}

/// What the dispatcher does after a processor returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Skip the remaining processors for this step.
    Stop,
}

/// A pipeline stage.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow;
}

/// State shared by the processors during a run.
///
/// One message lives for the whole run: values set while processing a drop
/// are still visible in later steps and drops.
#[derive(Default)]
pub struct ProcessMessage {
    step: Option<Step>,
    /// Index of the current drop. Setting it to `-1` restarts the loop.
    pub position: isize,
    /// The parsed document, only during [`Step::Dom`].
    pub dom: Option<Dom>,
    values: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    canceled: Option<String>,
}

impl ProcessMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current step, [`Step::Start`] before a run begins.
    pub fn step(&self) -> Step {
        self.step.unwrap_or(Step::Start)
    }

    pub fn position(&self) -> isize {
        self.position
    }

    /// Index of the current drop, when the position is valid.
    pub fn index(&self) -> Option<usize> {
        usize::try_from(self.position).ok()
    }

    pub fn value<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn set_value<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.values.insert(key, Box::new(value));
    }

    pub fn remove_value(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// Remove a value and return it when it has the expected type.
    pub fn take_value<T: Any>(&mut self, key: &str) -> Option<T> {
        let value = self.values.remove(key)?;
        value.downcast::<T>().ok().map(|v| *v)
    }

    /// Drop the parsed document and the current drop's body.
    pub fn reset_content(&mut self, x: &mut Extractor) {
        self.dom = None;
        if let Some(d) = x.current_drop_mut(self) {
            d.body.clear();
        }
    }

    /// Stop the whole run after the current step.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.canceled = Some(reason.into());
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.is_some()
    }
}

/// Runs the processor chain over one or more drops.
pub struct Extractor {
    url: Url,
    drops: Vec<Drop>,
    visited: HashSet<String>,
    processors: Vec<Arc<dyn Processor>>,
    client: HttpClient,
    transcoder: Transcoder,
    log: RunLog,
    html: String,
    text: String,
    aborted: Option<String>,
}

impl Extractor {
    /// An extractor for `url` with a default HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapbookError::InvalidUrl`] when `url` is not an absolute
    /// http(s) URL with a host.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_client(url, HttpClient::new(FetchConfig::default())?)
    }

    /// An extractor using `client` for every request.
    pub fn with_client(url: &str, client: HttpClient) -> Result<Self> {
        let mut url = parse_url(url)?;
        url.set_fragment(None);
        let drops = vec![Drop::new(&url)];

        Ok(Self {
            url,
            drops,
            visited: HashSet::new(),
            processors: Vec::new(),
            client,
            transcoder: Transcoder::default(),
            log: RunLog::new(),
            html: String::new(),
            text: String::new(),
            aborted: None,
        })
    }

    /// Use `html` as the first drop's body instead of fetching it.
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        let html = html.into();
        if let Some(d) = self.drops.first_mut() {
            d.body = html;
        }
        self
    }

    pub fn with_transcoder(mut self, transcoder: Transcoder) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn add_processors(&mut self, processors: impl IntoIterator<Item = Arc<dyn Processor>>) {
        self.processors.extend(processors);
    }

    pub fn drops(&self) -> &[Drop] {
        &self.drops
    }

    pub fn drops_mut(&mut self) -> &mut [Drop] {
        &mut self.drops
    }

    /// The first drop.
    pub fn drop(&self) -> Option<&Drop> {
        self.drops.first()
    }

    pub fn drop_mut(&mut self) -> Option<&mut Drop> {
        self.drops.first_mut()
    }

    /// The drop being processed.
    pub fn current_drop(&self, m: &ProcessMessage) -> Option<&Drop> {
        m.index().and_then(|i| self.drops.get(i))
    }

    pub fn current_drop_mut(&mut self, m: &ProcessMessage) -> Option<&mut Drop> {
        m.index().and_then(|i| self.drops.get_mut(i))
    }

    /// Queue another page.
    pub fn add_drop(&mut self, url: &Url) {
        self.drops.push(Drop::new(url));
    }

    /// Replace the only drop with a new one.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapbookError::TooManyDrops`] when more than one drop exists.
    pub fn replace_drop(&mut self, url: &Url) -> Result<()> {
        if self.drops.len() != 1 {
            return Err(ScrapbookError::TooManyDrops);
        }
        self.drops[0] = Drop::new(url);
        Ok(())
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut HttpClient {
        &mut self.client
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Whether `url` was already fetched during this run.
    pub fn visited(&self, url: &Url) -> bool {
        self.visited.contains(&visit_key(url))
    }

    pub fn errors(&self) -> &[String] {
        self.log.errors()
    }

    /// Record a non fatal error.
    pub fn add_error(&mut self, error: impl fmt::Display) {
        self.log.push_error(error);
    }

    pub fn logs(&self) -> &[String] {
        self.log.lines()
    }

    pub fn log(&mut self) -> &mut RunLog {
        &mut self.log
    }

    /// Combined HTML of every drop.
    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Why the run ended early: a drop failed to load or a processor
    /// canceled it.
    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    /// Run the extraction.
    ///
    /// Failures are never returned: a drop that cannot be loaded or a
    /// canceled step ends the run and is reported in [`Extractor::errors`].
    pub async fn run(&mut self) {
        let mut m = ProcessMessage::new();
        let mut i = 0usize;

        while i < self.drops.len() {
            let key = visit_key(&self.drops[i].url);
            if self.visited.contains(&key) {
                i += 1;
                continue;
            }
            self.visited.insert(key);
            m.position = i as isize;

            let url = self.drops[i].url.to_string();
            self.log.info("start", &[("idx", &i), ("url", &url)]);
            if self.run_step(&mut m, Step::Start).await {
                return;
            }

            let loaded = match m.index() {
                Some(idx) if idx < self.drops.len() => self.drops[idx].load(&self.client).await,
                _ => Err(ScrapbookError::InvalidUrl(url.clone())),
            };
            if let Err(err) = loaded {
                self.log.error("cannot load resource", &[("error", &err)]);
                self.aborted = Some(err.to_string());
                return;
            }

            self.log.debug("step body", &[]);
            if self.run_step(&mut m, Step::Body).await {
                return;
            }

            if self.current_drop(&m).is_some_and(Drop::is_html) {
                let (current_url, body) = match self.current_drop(&m) {
                    Some(d) => (d.url.clone(), d.body.clone()),
                    None => break,
                };
                self.log.debug("step DOM", &[]);
                m.dom = Some(Dom::new(body));
                let canceled = self.run_step(&mut m, Step::Dom).await;
                if canceled {
                    return;
                }

                if let Some(dom) = m.dom.take()
                    && let Some(d) = self.current_drop_mut(&m)
                    && d.url == current_url
                {
                    d.body = dom.body_html();
                }
            }

            self.log.debug("step finish", &[]);
            if self.run_step(&mut m, Step::Finish).await {
                return;
            }

            i = usize::try_from(m.position + 1).unwrap_or_default();
        }

        self.log.debug("postprocess", &[]);
        self.set_final_html();
        m.step = Some(Step::PostProcess);
        self.run_processors(&mut m).await;
    }

    /// Run one step and report whether the run was canceled.
    async fn run_step(&mut self, m: &mut ProcessMessage, step: Step) -> bool {
        m.step = Some(step);
        self.run_processors(m).await;

        let Some(reason) = m.canceled.clone() else {
            return false;
        };
        self.log.error("operation canceled", &[("error", &reason)]);
        m.reset_content(self);
        self.aborted = Some(reason);
        true
    }

    async fn run_processors(&mut self, m: &mut ProcessMessage) {
        let processors = self.processors.clone();
        for p in processors {
            if p.process(m, self).await == Flow::Stop {
                tracing::debug!(processor = p.name(), step = %m.step(), "processor stopped the chain");
                break;
            }
        }
    }

    fn set_final_html(&mut self) {
        let mut html = String::new();
        for (i, d) in self.drops.iter().enumerate() {
            if d.body.is_empty() {
                continue;
            }
            html.push_str(&format!("<!-- page {} -->\n", i + 1));
            html.push_str(&d.body);
            html.push('\n');
        }
        self.html = html;
    }
}

fn parse_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| ScrapbookError::InvalidUrl(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ScrapbookError::InvalidUrl(url.to_string()));
    }
    Ok(parsed)
}

fn visit_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Calls a closure for every step.
    struct Hook<F>(F);

    #[async_trait]
    impl<F> Processor for Hook<F>
    where
        F: Fn(&mut ProcessMessage, &mut Extractor) -> Flow + Send + Sync,
    {
        fn name(&self) -> &'static str {
            "hook"
        }

        async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
            (self.0)(m, x)
        }
    }

    fn hook<F>(f: F) -> Arc<dyn Processor>
    where
        F: Fn(&mut ProcessMessage, &mut Extractor) -> Flow + Send + Sync + 'static,
    {
        Arc::new(Hook(f))
    }

    async fn server() -> MockServer {
        let server = MockServer::start().await;
        for (p, body) in [
            ("/page1", "<html><body><p>page 1</p></body></html>"),
            ("/page2", "<html><body><p>page 2</p></body></html>"),
        ] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8"))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET")).and(path("/404")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
        server
    }

    #[test]
    fn test_new_invalid_url() {
        assert!(matches!(Extractor::new("/relative"), Err(ScrapbookError::InvalidUrl(_))));
        assert!(matches!(Extractor::new("ftp://example.net/"), Err(ScrapbookError::InvalidUrl(_))));
    }

    #[test]
    fn test_new_strips_fragment() {
        let ex = Extractor::new("http://example.net/a#top").unwrap();
        assert_eq!(ex.url().as_str(), "http://example.net/a");
        assert_eq!(ex.drops().len(), 1);
        assert_eq!(ex.drop().unwrap().url.as_str(), "http://example.net/a");
    }

    #[test]
    fn test_drops() {
        let mut ex = Extractor::new("http://example.net/").unwrap();
        ex.replace_drop(&Url::parse("http://example.net/new").unwrap()).unwrap();
        assert_eq!(ex.drop().unwrap().url.as_str(), "http://example.net/new");

        ex.add_drop(&Url::parse("http://example.net/2").unwrap());
        assert_eq!(ex.drops().len(), 2);
        let err = ex.replace_drop(&Url::parse("http://example.net/x").unwrap()).unwrap_err();
        assert!(matches!(err, ScrapbookError::TooManyDrops));
    }

    #[test]
    fn test_message_values() {
        let mut m = ProcessMessage::new();
        m.set_value("next_page", Url::parse("http://example.net/2").unwrap());
        assert!(m.value::<Url>("next_page").is_some());
        assert!(m.value::<String>("next_page").is_none());
        assert!(m.take_value::<Url>("next_page").is_some());
        assert!(m.value::<Url>("next_page").is_none());
    }

    #[tokio::test]
    async fn test_run_simple() {
        let server = server().await;
        let mut ex = Extractor::new(&format!("{}/page1", server.uri())).unwrap();
        ex.run().await;

        assert_eq!(ex.html(), "<!-- page 1 -->\n<p>page 1</p>\n");
        assert!(ex.errors().is_empty());
        assert_eq!(ex.aborted(), None);
        assert!(ex.logs()[0].starts_with("[INFO] start idx=\"0\""));
    }

    #[tokio::test]
    async fn test_run_load_error() {
        let server = server().await;
        let mut ex = Extractor::new(&format!("{}/404", server.uri())).unwrap();
        ex.run().await;

        assert_eq!(ex.html(), "");
        assert_eq!(ex.errors(), ["cannot load resource error=\"Invalid status code (404)\""]);
        assert_eq!(ex.aborted(), Some("Invalid status code (404)"));
    }

    #[tokio::test]
    async fn test_run_with_html() {
        let mut ex = Extractor::new("http://example.invalid/").unwrap().with_html("<html><body><b>x</b></body></html>");
        ex.run().await;
        assert_eq!(ex.html(), "<!-- page 1 -->\n<b>x</b>\n");
    }

    #[tokio::test]
    async fn test_run_process_body_and_values() {
        let mut ex = Extractor::new("http://example.invalid/").unwrap().with_html("<p>hello</p>");
        ex.add_processors([
            hook(|m, x| {
                if m.step() == Step::Body {
                    m.set_value("seen", true);
                    if let Some(d) = x.current_drop_mut(m) {
                        d.body = d.body.replace("hello", "bye");
                    }
                }
                Flow::Continue
            }),
            hook(|m, x| {
                if m.step() == Step::Finish && m.value::<bool>("seen") == Some(&true) {
                    x.log().info("value seen", &[]);
                }
                Flow::Continue
            }),
        ]);
        ex.run().await;

        assert_eq!(ex.html(), "<!-- page 1 -->\n<p>bye</p>\n");
        assert!(ex.logs().iter().any(|l| l == "[INFO] value seen"));
    }

    #[tokio::test]
    async fn test_run_stop_skips_remaining() {
        let mut ex = Extractor::new("http://example.invalid/").unwrap().with_html("<p>a</p>");
        ex.add_processors([
            hook(|_, _| Flow::Stop),
            hook(|_, x| {
                x.add_error("should not run");
                Flow::Continue
            }),
        ]);
        ex.run().await;
        assert!(ex.errors().is_empty());
    }

    #[tokio::test]
    async fn test_run_add_drop_visits_once() {
        let server = server().await;
        let page2 = Url::parse(&format!("{}/page2", server.uri())).unwrap();
        let page1 = Url::parse(&format!("{}/page1#frag", server.uri())).unwrap();
        let mut ex = Extractor::new(&format!("{}/page1", server.uri())).unwrap();
        ex.add_processors([hook(move |m, x| {
            if m.step() == Step::Finish {
                x.add_drop(&page2);
                x.add_drop(&page1);
            }
            Flow::Continue
        })]);
        ex.run().await;

        assert_eq!(ex.drops().len(), 5);
        assert_eq!(ex.html(), "<!-- page 1 -->\n<p>page 1</p>\n<!-- page 2 -->\n<p>page 2</p>\n");
        assert_eq!(ex.logs().iter().filter(|l| l.starts_with("[INFO] start")).count(), 2);
    }

    #[tokio::test]
    async fn test_run_cancel_clears_body() {
        let mut ex = Extractor::new("http://example.invalid/").unwrap().with_html("<p>secret</p>");
        ex.add_processors([hook(|m, _| {
            if m.step() == Step::Dom {
                m.cancel("nope");
            }
            Flow::Continue
        })]);
        ex.run().await;

        assert_eq!(ex.html(), "");
        assert!(ex.drop().unwrap().body.is_empty());
        assert_eq!(ex.errors(), ["operation canceled error=\"nope\""]);
        assert_eq!(ex.aborted(), Some("nope"));
    }

    #[tokio::test]
    async fn test_run_replace_drop_restarts() {
        let server = server().await;
        let page2 = Url::parse(&format!("{}/page2", server.uri())).unwrap();
        let mut ex = Extractor::new(&format!("{}/page1", server.uri())).unwrap();
        ex.add_processors([hook(move |m, x| {
            if m.step() == Step::Dom && !x.visited(&page2) {
                x.replace_drop(&page2).unwrap();
                m.position = -1;
                return Flow::Stop;
            }
            Flow::Continue
        })]);
        ex.run().await;

        assert_eq!(ex.drops().len(), 1);
        assert_eq!(ex.html(), "<!-- page 1 -->\n<p>page 2</p>\n");
    }

    #[tokio::test]
    async fn test_postprocess_sees_final_html() {
        let mut ex = Extractor::new("http://example.invalid/").unwrap().with_html("<p>x</p>");
        ex.add_processors([hook(|m, x| {
            if m.step() == Step::PostProcess {
                let text = x.html().to_uppercase();
                x.set_text(text);
            }
            Flow::Continue
        })]);
        ex.run().await;
        assert_eq!(ex.text(), "<!-- PAGE 1 -->\n<P>X</P>\n");
    }
}
