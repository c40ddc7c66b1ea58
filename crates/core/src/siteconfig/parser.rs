use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Result, ScrapbookError};
use crate::siteconfig::directives::{Directive, SiteConfig, parse_directive};

/// Rule file formats, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
    /// FiveFilters `key: value` lines
    Text,
}

impl ConfigFormat {
    pub const ALL: [ConfigFormat; 3] = [ConfigFormat::Json, ConfigFormat::Toml, ConfigFormat::Text];

    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Text => "txt",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }
}

/// Site rule file parser
#[derive(Debug)]
pub struct ConfigParser;

impl ConfigParser {
    /// Parse a single rule file, picking the format from its extension
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<SiteConfig> {
        let path = path.as_ref();
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ConfigFormat::from_extension)
            .ok_or_else(|| ScrapbookError::SiteConfigError(format!("Unknown file type: {}", path.display())))?;

        let content = std::fs::read_to_string(path)
            .map_err(|e| ScrapbookError::SiteConfigError(format!("Cannot open file {}: {}", path.display(), e)))?;

        Self::parse_str(&content, format)
            .map_err(|e| ScrapbookError::SiteConfigError(format!("{}: {}", path.display(), e)))
    }

    /// Parse rule content in the given format
    pub fn parse_str(content: &str, format: ConfigFormat) -> Result<SiteConfig> {
        match format {
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| ScrapbookError::SiteConfigError(e.to_string()))
            }
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| ScrapbookError::SiteConfigError(e.to_string())),
            ConfigFormat::Text => Self::parse_string(content),
        }
    }

    /// Parse FTR text config from a reader
    pub fn parse_reader<R: BufRead>(reader: R) -> Result<SiteConfig> {
        let mut entries = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line_number = idx + 1;
            let line = line
                .map_err(|e| ScrapbookError::SiteConfigError(format!("Read error at line {}: {}", line_number, e)))?;

            match parse_directive(&line) {
                Ok(Some(directive)) => entries.push((line_number, directive)),
                Ok(None) => {}
                Err(e) => {
                    return Err(ScrapbookError::SiteConfigError(format!(
                        "Parse error at line {}: {}",
                        line_number, e
                    )));
                }
            }
        }

        Self::assemble(entries)
    }

    /// Parse FTR text config from a string
    pub fn parse_string(content: &str) -> Result<SiteConfig> {
        Self::parse_reader(BufReader::new(content.as_bytes()))
    }

    /// Build a config from directives, pairing `find_string` with the
    /// `replace_string` that follows it.
    fn assemble(entries: Vec<(usize, Directive)>) -> Result<SiteConfig> {
        let mut config = SiteConfig::new();
        let mut entries = entries.into_iter();

        while let Some((line_number, directive)) = entries.next() {
            match directive {
                Directive::FindString(find) => match entries.next() {
                    Some((_, Directive::ReplaceString(None, replace))) => {
                        config.replace_strings.push((find, replace));
                    }
                    _ => {
                        return Err(ScrapbookError::SiteConfigError(format!(
                            "No replace_string after find_string at line {}",
                            line_number
                        )));
                    }
                },
                Directive::ReplaceString(None, _) => {
                    return Err(ScrapbookError::SiteConfigError(format!(
                        "No find_string before replace_string at line {}",
                        line_number
                    )));
                }
                Directive::TestContains(_) if config.tests.is_empty() => {
                    return Err(ScrapbookError::SiteConfigError(format!(
                        "No test_url before test_contains at line {}",
                        line_number
                    )));
                }
                directive => config.add_directive(directive),
            }
        }

        Ok(config)
    }
}
