//! File settings.
//!
//! Every key is optional; missing ones keep the library defaults:
//!
//! ```toml
//! workers = 4
//! storage_dir = "/var/lib/scrapbook"
//!
//! [fetch]
//! timeout = 15
//! user_agent = "scrapbook/0.4"
//! denied_ips = ["127.0.0.0/8", "10.0.0.0/8", "::1/128"]
//!
//! [archive]
//! max_downloads = 8
//! timeout = 30
//! flags = ["images", "css"]
//!
//! [site_config]
//! folders = ["/etc/scrapbook/sites"]
//! defaults = true
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::archiver::ArchiveFlags;
use crate::bookmark::JobConfig;
use crate::fetch::{FetchConfig, IpNetwork};
use crate::siteconfig::{ConfigFolder, ConfigLoader, default_folders};
use crate::{Result, ScrapbookError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSettings {
    /// Request timeout in seconds.
    pub timeout: Option<u64>,
    pub user_agent: Option<String>,
    /// Denied destinations in CIDR notation.
    pub denied_ips: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveSettings {
    pub max_downloads: Option<usize>,
    /// Per resource timeout in seconds.
    pub timeout: Option<u64>,
    /// Resource classes: `css`, `embeds`, `js`, `media`, `images`.
    pub flags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfigSettings {
    /// Folders searched before the default ones.
    pub folders: Vec<PathBuf>,
    /// Whether the default folders are searched too. Defaults to true.
    pub defaults: Option<bool>,
}

/// Settings read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub workers: Option<usize>,
    pub storage_dir: Option<PathBuf>,
    pub fetch: FetchSettings,
    pub archive: ArchiveSettings,
    pub site_config: SiteConfigSettings,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ScrapbookError::ConfigError(e.to_string()))
    }

    /// Read settings from a file.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapbookError::FileNotFound`] when the file does not exist
    /// and [`ScrapbookError::ConfigError`] when it is not valid.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ScrapbookError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| match e {
            ScrapbookError::ConfigError(msg) => ScrapbookError::ConfigError(format!("{}: {msg}", path.display())),
            e => e,
        })
    }

    pub fn fetch_config(&self) -> Result<FetchConfig> {
        let mut config = FetchConfig::default();
        if let Some(timeout) = self.fetch.timeout {
            config.timeout = timeout;
        }
        if let Some(user_agent) = &self.fetch.user_agent {
            config.user_agent = user_agent.clone();
        }
        config.denied_ips = self.fetch.denied_ips.iter().map(|s| s.parse::<IpNetwork>()).collect::<Result<_>>()?;
        Ok(config)
    }

    /// Site config folders: the configured ones, named `custom`, `custom-2`
    /// and so on, followed by the defaults unless disabled.
    pub fn site_config_folders(&self) -> Vec<ConfigFolder> {
        let mut folders: Vec<ConfigFolder> = self
            .site_config
            .folders
            .iter()
            .enumerate()
            .map(|(i, dir)| {
                let name = if i == 0 { "custom".to_string() } else { format!("custom-{}", i + 1) };
                ConfigFolder::new(name, dir)
            })
            .collect();
        if self.site_config.defaults.unwrap_or(true) {
            folders.extend(default_folders());
        }
        folders
    }

    pub fn archive_flags(&self) -> Result<Option<ArchiveFlags>> {
        let Some(names) = &self.archive.flags else {
            return Ok(None);
        };
        let mut flags = ArchiveFlags::empty();
        for name in names {
            flags |= ArchiveFlags::from_name(name)
                .ok_or_else(|| ScrapbookError::ConfigError(format!("unknown archive flag {name:?}")))?;
        }
        Ok(Some(flags))
    }

    /// Job settings with these values applied over the defaults.
    pub fn job_config(&self) -> Result<JobConfig> {
        let mut config = JobConfig {
            fetch: self.fetch_config()?,
            site_config: Arc::new(ConfigLoader::new(self.site_config_folders())),
            ..JobConfig::default()
        };
        if let Some(workers) = self.workers {
            config.workers = workers.max(1);
        }
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = dir.clone();
        }
        if let Some(max) = self.archive.max_downloads {
            config.archive.max_downloads = max.max(1);
        }
        if let Some(timeout) = self.archive.timeout {
            config.archive.timeout = Duration::from_secs(timeout);
        }
        if let Some(flags) = self.archive_flags()? {
            config.archive.flags = flags;
        }
        Ok(config)
    }
}
