use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Result, ScrapbookError};
use crate::siteconfig::directives::SiteConfig;
use crate::siteconfig::parser::{ConfigFormat, ConfigParser};

/// A named directory of site rule files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFolder {
    pub name: String,
    pub path: PathBuf,
}

impl ConfigFolder {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), path: path.into() }
    }

    /// Find `name.{json,toml,txt}` in this folder.
    fn lookup(&self, name: &str) -> Option<RuleFile> {
        ConfigFormat::ALL.into_iter().find_map(|format| {
            let file_name = format!("{}.{}", name, format.extension());
            let path = self.path.join(&file_name);
            path.is_file().then(|| RuleFile { path, provenance: format!("{}/{}", self.name, file_name) })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RuleFile {
    path: PathBuf,
    provenance: String,
}

/// Default folders: `custom` (`~/.config/scrapbook/sites`) then `standard`
/// (`./site-config`), each only when it exists.
pub fn default_folders() -> Vec<ConfigFolder> {
    let mut folders = Vec::new();
    if let Some(dir) = dirs::config_dir().map(|d| d.join("scrapbook").join("sites"))
        && dir.is_dir()
    {
        folders.push(ConfigFolder::new("custom", dir));
    }
    let standard = PathBuf::from("site-config");
    if standard.is_dir() {
        folders.push(ConfigFolder::new("standard", standard));
    }
    folders
}

/// Lower-cased IDNA ASCII form of a host, without a leading `www.`
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);
    idna::domain_to_ascii(host).unwrap_or_else(|_| host.to_lowercase())
}

/// Find and merge every rule file for `hostname`.
///
/// Files are looked up as: the exact host in every folder, then in each
/// folder the most specific `.suffix` wildcard, then `global` in every
/// folder. Merging stops once a merged file turns `autodetect_on_failure`
/// off.
///
/// # Errors
///
/// Returns [`ScrapbookError::SiteConfigError`] when a file cannot be decoded.
pub fn resolve(hostname: &str, folders: &[ConfigFolder]) -> Result<SiteConfig> {
    let host = normalize_host(hostname);

    let mut files: Vec<RuleFile> = folders.iter().filter_map(|f| f.lookup(&host)).collect();
    files.extend(find_wildcards(&host, folders));
    files.extend(folders.iter().filter_map(|f| f.lookup("global")));

    let mut merged = SiteConfig::new();
    for file in files {
        if !merged.should_autodetect() {
            break;
        }
        let mut config = ConfigParser::parse_file(&file.path)?;
        config.files = vec![file.provenance];
        merged.merge(&config);
    }

    debug!(host = %host, files = ?merged.files, "site configuration resolved");
    Ok(merged)
}

fn find_wildcards(host: &str, folders: &[ConfigFolder]) -> Vec<RuleFile> {
    let parts: Vec<&str> = host.split('.').collect();
    folders
        .iter()
        .filter_map(|folder| (0..parts.len()).find_map(|i| folder.lookup(&format!(".{}", parts[i..].join(".")))))
        .collect()
}

/// Resolves site rules for hosts, keeping merged results.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    folders: Vec<ConfigFolder>,
    cache: Mutex<HashMap<String, Arc<SiteConfig>>>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new(folders: Vec<ConfigFolder>) -> Self {
        Self { folders, cache: Mutex::new(HashMap::new()) }
    }

    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder::new()
    }

    /// A loader over [`default_folders`].
    pub fn with_default_folders() -> Self {
        Self::new(default_folders())
    }

    pub fn folders(&self) -> &[ConfigFolder] {
        &self.folders
    }

    /// Load configuration for a host
    pub fn load_for_host(&self, host: &str) -> Result<Arc<SiteConfig>> {
        let key = normalize_host(host);
        if let Some(config) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(config));
        }

        let config = Arc::new(resolve(&key, &self.folders)?);
        self.cache.lock().insert(key, Arc::clone(&config));
        Ok(config)
    }

    /// Load configuration for a URL
    pub fn load_for_url(&self, url: &Url) -> Result<Arc<SiteConfig>> {
        let host = url.host_str().ok_or_else(|| ScrapbookError::InvalidUrl(url.to_string()))?;
        self.load_for_host(host)
    }

    /// Clear the config cache
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}

/// Builder for ConfigLoader
#[derive(Debug, Default)]
pub struct ConfigLoaderBuilder {
    folders: Vec<ConfigFolder>,
}

impl ConfigLoaderBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a folder after the ones already set
    pub fn folder<P: AsRef<Path>>(mut self, name: &str, path: P) -> Self {
        self.folders.push(ConfigFolder::new(name, path.as_ref()));
        self
    }

    /// Set custom config directory
    pub fn custom_dir<P: AsRef<Path>>(self, path: P) -> Self {
        self.folder("custom", path)
    }

    /// Set standard config directory
    pub fn standard_dir<P: AsRef<Path>>(self, path: P) -> Self {
        self.folder("standard", path)
    }

    /// Build the ConfigLoader
    pub fn build(self) -> ConfigLoader {
        ConfigLoader::new(self.folders)
    }
}
