pub mod archiver;
pub mod bookmark;
pub mod config;
pub mod contents;
pub mod decode;
pub mod dom;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod img;
pub mod meta;
pub mod searchstring;
pub mod siteconfig;
pub mod xpath;

pub use archiver::{ArchiveFlags, Archiver, ArchiverBuilder, Asset};
pub use bookmark::{
    ArchiveOptions, Bookmark, BookmarkFile, BookmarkStore, JobConfig, JsonFileStore, MemoryStore, State, WorkerPool,
    run_job, standard_processors,
};
pub use config::Settings;
pub use dom::{Document, Dom};
pub use error::{Result, ScrapbookError};
pub use extract::{Drop, Extractor, Flow, ProcessMessage, Processor, Step};
pub use fetch::{FetchConfig, HttpClient, IpNetwork};
pub use fetch::{fetch_file, fetch_stdin};
pub use img::Transcoder;
pub use searchstring::{SearchTerm, parse as parse_search};
pub use siteconfig::{ConfigFolder, ConfigLoader, SiteConfig};
