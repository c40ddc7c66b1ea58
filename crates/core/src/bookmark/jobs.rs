//! Extraction jobs and the worker pool running them.

use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::{Bookmark, BookmarkStore, CheckIp, CleanDom, RESOURCE_DIR, State, resource_name, write_container};
use crate::archiver::{ArchiveFlags, Archiver, Asset, EventLog};
use crate::contents::{Readability, Text};
use crate::extract::{Extractor, Processor};
use crate::fetch::{FetchConfig, HttpClient};
use crate::img::Transcoder;
use crate::meta::{ExtractFavicon, ExtractMeta, ExtractOembed, ExtractPicture, SetDropProperties};
use crate::siteconfig::{
    ConfigLoader, ExtractAuthor, ExtractBody, ExtractDate, FindContentPage, FindNextPage, GoToNextPage,
    LoadConfiguration, ReplaceStrings, StripTags,
};

/// How the final document is archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub max_downloads: usize,
    pub timeout: Duration,
    pub flags: ArchiveFlags,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self { max_downloads: 5, timeout: Duration::from_secs(20), flags: ArchiveFlags::IMAGES }
    }
}

/// Settings shared by every job of a pool.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Number of jobs running at once.
    pub workers: usize,
    /// Root folder of the zip containers.
    pub storage_dir: PathBuf,
    pub fetch: FetchConfig,
    pub site_config: Arc<ConfigLoader>,
    pub archive: ArchiveOptions,
    /// Image work permits, shared by every job.
    pub transcoder: Transcoder,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            storage_dir: dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("scrapbook"),
            fetch: FetchConfig::default(),
            site_config: Arc::new(ConfigLoader::with_default_folders()),
            archive: ArchiveOptions::default(),
            transcoder: Transcoder::default(),
        }
    }
}

impl JobConfig {
    /// Path of a bookmark container.
    pub fn container_path(&self, bookmark: &Bookmark) -> PathBuf {
        self.storage_dir.join(format!("{}.zip", bookmark.base_file_path()))
    }
}

/// The processor chain of a bookmark job.
///
/// Multi-page discovery only runs when the page is fetched: supplied HTML is
/// taken as the whole document.
pub fn standard_processors(site_config: Arc<ConfigLoader>, has_html: bool) -> Vec<Arc<dyn Processor>> {
    let mut processors: Vec<Arc<dyn Processor>> = vec![
        Arc::new(CheckIp),
        Arc::new(ExtractMeta),
        Arc::new(ExtractOembed),
        Arc::new(SetDropProperties),
        Arc::new(ExtractFavicon),
        Arc::new(ExtractPicture),
        Arc::new(LoadConfiguration::new(site_config)),
        Arc::new(ReplaceStrings),
    ];
    if !has_html {
        processors.push(Arc::new(FindContentPage));
        processors.push(Arc::new(FindNextPage));
    }
    processors.extend([
        Arc::new(ExtractAuthor) as Arc<dyn Processor>,
        Arc::new(ExtractDate),
        Arc::new(ExtractBody),
        Arc::new(StripTags),
        Arc::new(GoToNextPage),
        Arc::new(Readability::new()),
        Arc::new(CleanDom),
        Arc::new(Text),
    ]);
    processors
}

/// Run one bookmark job and save its outcome.
///
/// The bookmark ends in [`State::Loaded`], or [`State::Error`] when the
/// extraction was aborted or panicked. It is saved in every case.
pub async fn run_job(
    bookmark: Bookmark, html: Option<String>, config: &JobConfig, store: &dyn BookmarkStore,
) -> Bookmark {
    let has_html = html.as_deref().is_some_and(|h| !h.is_empty());
    let processors = standard_processors(Arc::clone(&config.site_config), has_html);
    run_with(bookmark, html, config, store, processors).await
}

async fn run_with(
    mut bookmark: Bookmark, html: Option<String>, config: &JobConfig, store: &dyn BookmarkStore,
    processors: Vec<Arc<dyn Processor>>,
) -> Bookmark {
    let outcome = AssertUnwindSafe(extract(&mut bookmark, html, config, processors)).catch_unwind().await;
    if let Err(panic) = outcome {
        let error = panic_message(panic.as_ref());
        tracing::error!(uid = %bookmark.uid, error = %error, "error during extraction");
        bookmark.errors.push(error);
        bookmark.state = State::Error;
    }

    if bookmark.state == State::Loading {
        bookmark.state = State::Loaded;
    }
    if let Err(err) = store.save(&bookmark).await {
        tracing::error!(uid = %bookmark.uid, error = %err, "cannot save bookmark");
    }
    bookmark
}

async fn extract(
    bookmark: &mut Bookmark, html: Option<String>, config: &JobConfig, processors: Vec<Arc<dyn Processor>>,
) {
    let ex = HttpClient::new(config.fetch.clone()).and_then(|client| Extractor::with_client(&bookmark.url, client));
    let mut ex = match ex {
        Ok(ex) => ex.with_transcoder(config.transcoder.clone()),
        Err(err) => {
            tracing::error!(url = %bookmark.url, error = %err, "cannot start extraction");
            bookmark.errors.push(err.to_string());
            bookmark.state = State::Error;
            return;
        }
    };
    if let Some(html) = html.filter(|h| !h.is_empty()) {
        ex = ex.with_html(html);
    }
    ex.log().with_field("@id", &bookmark.uid);
    ex.add_processors(processors);
    ex.run().await;

    let (archived, archiver) = archive(&mut ex, &config.archive).await;

    bookmark.update_from(&ex);
    bookmark.state = if ex.aborted().is_some() { State::Error } else { State::Loaded };

    let path = config.container_path(bookmark);
    bookmark.file_path = bookmark.base_file_path();
    match write_container(&path, &ex, archived.as_deref(), archiver.as_ref()) {
        Ok(files) => bookmark.files = files,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "cannot write container");
            bookmark.errors.push(err.to_string());
            remove_file(&path);
            bookmark.file_path.clear();
            bookmark.files.clear();
        }
    }
}

/// Archive the final document with its images relocated under
/// [`RESOURCE_DIR`]. Archiver events are added to the run log.
async fn archive(ex: &mut Extractor, options: &ArchiveOptions) -> (Option<String>, Option<Archiver>) {
    let Some(base) = ex.drop().filter(|d| d.is_html()).map(|d| d.url.clone()) else {
        return (None, None);
    };
    if ex.html().is_empty() {
        return (None, None);
    }

    let events = Arc::new(EventLog::new());
    let archiver = Archiver::builder(ex.client().clone())
        .max_downloads(options.max_downloads)
        .timeout(options.timeout)
        .flags(options.flags)
        .url_processor(Arc::new(|uri: &str, asset: &Asset| {
            format!("./{RESOURCE_DIR}/{}", resource_name(uri, &asset.content_type))
        }))
        .events(Arc::clone(&events) as _)
        .build();

    let html = ex.html().to_string();
    let archived = archiver.archive(&html, &base).await;
    ex.log().append_lines(events.lines());
    match archived {
        Ok(archived) => (Some(archived), Some(archiver)),
        Err(err) => {
            ex.log().error("archiver error", &[("error", &err)]);
            (None, Some(archiver))
        }
    }
}

fn remove_file(path: &Path) {
    if let Err(err) = std::fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %err, "cannot remove container");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "extraction panicked".to_string()
    }
}

/// Runs bookmark jobs with a fixed number of workers.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    config: Arc<JobConfig>,
    store: Arc<dyn BookmarkStore>,
}

impl WorkerPool {
    pub fn new(config: JobConfig, store: Arc<dyn BookmarkStore>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
        Self { semaphore, config: Arc::new(config), store }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Queue a bookmark. It is saved in the loading state right away, and
    /// again once its job is done.
    pub fn submit(&self, mut bookmark: Bookmark, html: Option<String>) -> JoinHandle<Bookmark> {
        let semaphore = Arc::clone(&self.semaphore);
        let config = Arc::clone(&self.config);
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            bookmark.reset();
            if let Err(err) = store.save(&bookmark).await {
                tracing::warn!(uid = %bookmark.uid, error = %err, "cannot save bookmark");
            }

            let _permit = semaphore.acquire_owned().await.ok();
            tracing::debug!(uid = %bookmark.uid, url = %bookmark.url, "job started");
            run_job(bookmark, html, &config, store.as_ref()).await
        })
    }
}
