//! Bookmark records and the jobs that fill them.
//!
//! A [`Bookmark`] is created in [`State::Loading`] and handed to a
//! [`WorkerPool`]. The job runs the extraction pipeline, archives the result
//! into a zip container and leaves the record in [`State::Loaded`] or
//! [`State::Error`] before saving it through a [`BookmarkStore`].

mod container;
mod jobs;
mod processors;
mod store;

pub use container::{ARTICLE_FILE, RESOURCE_DIR, extension_for, resource_name, write_container};
pub use jobs::{ArchiveOptions, JobConfig, WorkerPool, run_job, standard_processors};
pub use processors::{CheckIp, CleanDom};
pub use store::{BookmarkStore, JsonFileStore, MemoryStore};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;
use uuid::Uuid;

use crate::extract::{Drop, Extractor, registrable_domain};

/// Where a bookmark stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Loading,
    Loaded,
    Error,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Loading => "loading",
            State::Loaded => "loaded",
            State::Error => "error",
        };
        f.write_str(name)
    }
}

/// A file of the bookmark archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkFile {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<[u32; 2]>,
}

impl BookmarkFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), content_type: String::new(), size: None }
    }
}

/// A saved page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub uid: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
    pub state: State,
    pub url: String,
    pub title: String,
    pub domain: String,
    pub site: String,
    pub site_name: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published: Option<OffsetDateTime>,
    pub authors: Vec<String>,
    pub lang: String,
    pub document_type: String,
    pub description: String,
    pub text: String,
    pub word_count: usize,
    pub embed: String,
    /// Archive path relative to the storage directory, without extension.
    pub file_path: String,
    pub files: BTreeMap<String, BookmarkFile>,
    pub errors: Vec<String>,
    pub logs: Vec<String>,
}

impl Bookmark {
    /// A new bookmark in the loading state.
    pub fn new(url: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            uid: Uuid::new_v4().simple().to_string(),
            created: now,
            updated: now,
            state: State::Loading,
            url: url.into(),
            title: String::new(),
            domain: String::new(),
            site: String::new(),
            site_name: String::new(),
            published: None,
            authors: Vec::new(),
            lang: String::new(),
            document_type: String::new(),
            description: String::new(),
            text: String::new(),
            word_count: 0,
            embed: String::new(),
            file_path: String::new(),
            files: BTreeMap::new(),
            errors: Vec::new(),
            logs: Vec::new(),
        }
    }

    /// Put the bookmark back in the loading state for a new extraction.
    pub fn reset(&mut self) {
        self.state = State::Loading;
        self.errors.clear();
        self.logs.clear();
        self.files.clear();
        self.file_path.clear();
    }

    /// Copy the extraction output of the first drop.
    pub fn update_from(&mut self, ex: &Extractor) {
        let Some(d) = ex.drop() else {
            return;
        };

        self.updated = OffsetDateTime::now_utc();
        self.url = d.unescaped_url();
        self.domain = d.domain.clone();
        self.title = d.title.clone();
        self.site = d.hostname();
        self.site_name = d.site.clone();
        self.authors = d.authors.clone();
        self.lang = d.lang.clone();
        self.document_type = d.document_type.clone();
        self.description = d.description.clone();
        self.text = ex.text().to_string();
        self.word_count = self.text.split_whitespace().count();
        self.errors.extend(ex.errors().iter().cloned());
        self.logs = ex.logs().to_vec();
        if d.date.is_some() {
            self.published = d.date;
        }
        if d.is_media() {
            self.embed = d.meta.lookup_get(&["oembed.html"]).to_string();
        }
    }

    /// Archive path: `{registrable domain}/{creation day}/{uid}`.
    pub fn base_file_path(&self) -> String {
        let host = idna::domain_to_ascii(&self.site).unwrap_or_else(|_| self.site.clone());
        let domain = if host.is_empty() { host } else { registrable_domain(&host) };
        let day = self
            .created
            .format(format_description!("[year][month][day]"))
            .unwrap_or_default();
        [domain.as_str(), day.as_str(), self.uid.as_str()]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Fields written to `props.json`.
pub(crate) fn drop_properties(d: &Drop) -> serde_json::Result<Vec<u8>> {
    let mut out = serde_json::to_vec_pretty(d)?;
    out.push(b'\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    #[test]
    fn test_new_bookmark() {
        let b = Bookmark::new("https://example.net/");
        assert_eq!(b.state, State::Loading);
        assert_eq!(b.uid.len(), 32);
        assert!(b.files.is_empty());
    }

    #[test]
    fn test_base_file_path() {
        let mut b = Bookmark::new("https://blog.pérotin.com/a");
        b.uid = "abc".to_string();
        b.created = datetime!(2024-03-05 10:00 UTC);
        b.site = "blog.pérotin.com".to_string();
        assert_eq!(b.base_file_path(), "xn--protin-bva.com/20240305/abc");

        b.site = String::new();
        assert_eq!(b.base_file_path(), "20240305/abc");
    }

    #[test]
    fn test_update_from() {
        let mut ex = Extractor::new("https://www.example.net/a%20b").unwrap();
        ex.set_text("one two\nthree");
        let d = ex.drop_mut().unwrap();
        d.title = "Title".to_string();
        d.document_type = "video".to_string();
        d.meta.add("oembed.html", "<iframe></iframe>");
        ex.add_error("something odd");

        let mut b = Bookmark::new("https://www.example.net/a%20b");
        b.update_from(&ex);
        assert_eq!(b.url, "https://www.example.net/a b");
        assert_eq!(b.domain, "example.net");
        assert_eq!(b.site, "www.example.net");
        assert_eq!(b.title, "Title");
        assert_eq!(b.word_count, 3);
        assert_eq!(b.embed, "<iframe></iframe>");
        assert_eq!(b.errors, vec!["something odd"]);
        assert_eq!(b.state, State::Loading);
    }

    #[test]
    fn test_serialize_state() {
        let mut b = Bookmark::new("https://example.net/");
        b.created = datetime!(2024-03-05 10:00 UTC);
        b.updated = b.created;
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["state"], "loading");
        assert_eq!(json["created"], "2024-03-05T10:00:00Z");

        let back: Bookmark = serde_json::from_value(json).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn test_reset() {
        let mut b = Bookmark::new("https://example.net/");
        b.state = State::Error;
        b.errors.push("boom".to_string());
        b.files.insert("log".to_string(), BookmarkFile::new("log"));
        b.reset();
        assert_eq!(b.state, State::Loading);
        assert!(b.errors.is_empty());
        assert!(b.files.is_empty());
    }
}
