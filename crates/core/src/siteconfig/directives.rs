use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapbookError};

static LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)(?:\((.+)\))?:\s*(.*)$").expect("valid directive regex"));

/// A single line of a FiveFilters text rule file
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// XPath expressions for content extraction
    Title(String),
    Body(String),
    Date(String),
    Author(String),

    /// Elements to remove
    Strip(String),
    StripIdOrClass(String),
    StripImageSrc(String),
    NativeAdClue(String),

    /// Behavior options
    Tidy(bool),
    Prune(bool),
    AutodetectOnFailure(bool),

    /// Pagination
    SinglePageLink(String),
    NextPageLink(String),

    /// Text replacement. `replace_string(find): value` carries its own
    /// search string; a bare `replace_string` pairs with the preceding
    /// `find_string`.
    FindString(String),
    ReplaceString(Option<String>, String),

    HttpHeader(String, String),

    /// Regression tests
    TestUrl(String),
    TestContains(String),
}

/// A URL and the strings its extracted content must contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterTest {
    pub url: String,
    #[serde(default)]
    pub contains: Vec<String>,
}

/// Site rules, possibly merged from several files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Files this configuration was merged from, as `folder/name`.
    #[serde(skip_deserializing)]
    pub files: Vec<String>,

    pub title_selectors: Vec<String>,
    pub body_selectors: Vec<String>,
    pub date_selectors: Vec<String>,
    pub author_selectors: Vec<String>,

    pub strip_selectors: Vec<String>,
    pub strip_id_or_class: Vec<String>,
    pub strip_image_src: Vec<String>,
    pub native_ad_selectors: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tidy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prune: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autodetect_on_failure: Option<bool>,

    pub single_page_link_selectors: Vec<String>,
    pub next_page_link_selectors: Vec<String>,

    /// `(find, replace)` pairs applied to the raw body
    pub replace_strings: Vec<(String, String)>,

    pub http_headers: BTreeMap<String, String>,

    pub tests: Vec<FilterTest>,
}

impl SiteConfig {
    /// Create a new empty site config
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directive that stands on its own.
    ///
    /// Paired directives (`find_string`, bare `replace_string`, `test_url`,
    /// `test_contains`) are assembled by the text parser.
    pub fn add_directive(&mut self, directive: Directive) {
        match directive {
            Directive::Title(xpath) => self.title_selectors.push(xpath),
            Directive::Body(xpath) => self.body_selectors.push(xpath),
            Directive::Date(xpath) => self.date_selectors.push(xpath),
            Directive::Author(xpath) => self.author_selectors.push(xpath),

            Directive::Strip(xpath) => self.strip_selectors.push(xpath),
            Directive::StripIdOrClass(pattern) => self.strip_id_or_class.push(pattern),
            Directive::StripImageSrc(pattern) => self.strip_image_src.push(pattern),
            Directive::NativeAdClue(xpath) => self.native_ad_selectors.push(xpath),
            Directive::Tidy(value) => self.tidy = Some(value),
            Directive::Prune(value) => self.prune = Some(value),
            Directive::AutodetectOnFailure(value) => self.autodetect_on_failure = Some(value),
            Directive::SinglePageLink(xpath) => self.single_page_link_selectors.push(xpath),
            Directive::NextPageLink(xpath) => self.next_page_link_selectors.push(xpath),

            Directive::ReplaceString(Some(find), replace) => self.replace_strings.push((find, replace)),
            Directive::FindString(_) | Directive::ReplaceString(None, _) => {}

            Directive::HttpHeader(name, value) => {
                self.http_headers.insert(name, value);
            }

            Directive::TestUrl(url) => self.tests.push(FilterTest { url, contains: Vec::new() }),
            Directive::TestContains(value) => {
                if let Some(test) = self.tests.last_mut() {
                    test.contains.push(value);
                }
            }
        }
    }

    /// Merge another config into this one.
    ///
    /// Lists are appended, headers overwrite by name and flags override
    /// only when the other file sets them.
    pub fn merge(&mut self, other: &SiteConfig) {
        self.files.extend(other.files.iter().cloned());

        self.title_selectors.extend(other.title_selectors.iter().cloned());
        self.body_selectors.extend(other.body_selectors.iter().cloned());
        self.date_selectors.extend(other.date_selectors.iter().cloned());
        self.author_selectors.extend(other.author_selectors.iter().cloned());

        self.strip_selectors.extend(other.strip_selectors.iter().cloned());
        self.strip_id_or_class.extend(other.strip_id_or_class.iter().cloned());
        self.strip_image_src.extend(other.strip_image_src.iter().cloned());
        self.native_ad_selectors.extend(other.native_ad_selectors.iter().cloned());

        if other.tidy.is_some() {
            self.tidy = other.tidy;
        }
        if other.prune.is_some() {
            self.prune = other.prune;
        }
        if other.autodetect_on_failure.is_some() {
            self.autodetect_on_failure = other.autodetect_on_failure;
        }

        self.single_page_link_selectors.extend(other.single_page_link_selectors.iter().cloned());
        self.next_page_link_selectors.extend(other.next_page_link_selectors.iter().cloned());

        self.replace_strings.extend(other.replace_strings.iter().cloned());

        for (name, value) in &other.http_headers {
            self.http_headers.insert(name.clone(), value.clone());
        }

        self.tests.extend(other.tests.iter().cloned());
    }

    /// Whether later rule files may still be merged (default: true)
    pub fn should_autodetect(&self) -> bool {
        self.autodetect_on_failure.unwrap_or(true)
    }

    /// Get effective prune setting (default: true)
    pub fn should_prune(&self) -> bool {
        self.prune.unwrap_or(true)
    }

    /// Get effective tidy setting (default: false)
    pub fn should_tidy(&self) -> bool {
        self.tidy.unwrap_or(false)
    }

    /// Check if this config has any meaningful extraction directives
    pub fn has_extraction_config(&self) -> bool {
        !self.body_selectors.is_empty() || !self.title_selectors.is_empty()
    }

    /// Check if this config is effectively empty
    pub fn is_empty(&self) -> bool {
        self.body_selectors.is_empty()
            && self.title_selectors.is_empty()
            && self.author_selectors.is_empty()
            && self.date_selectors.is_empty()
            && self.strip_selectors.is_empty()
            && self.strip_id_or_class.is_empty()
            && self.strip_image_src.is_empty()
            && self.replace_strings.is_empty()
            && self.http_headers.is_empty()
    }
}

/// Parse a directive line from the FiveFilters text format.
///
/// Returns `Ok(None)` for blank lines, comments and unknown directives.
pub fn parse_directive(line: &str) -> Result<Option<Directive>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
        return Ok(None);
    }

    let caps = LINE_RE
        .captures(line)
        .ok_or_else(|| ScrapbookError::SiteConfigError(format!("Invalid directive format: {}", line)))?;
    let key = caps.get(1).map_or("", |m| m.as_str()).trim();
    let arg = caps.get(2).map(|m| m.as_str().to_string());
    let value = unquote(caps.get(3).map_or("", |m| m.as_str()).trim()).to_string();

    let directive = match key {
        "title" => Directive::Title(value),
        "body" => Directive::Body(value),
        "date" => Directive::Date(value),
        "author" => Directive::Author(value),

        "strip" => Directive::Strip(value),
        "strip_id_or_class" => Directive::StripIdOrClass(value),
        "strip_image_src" => Directive::StripImageSrc(value),
        "native_ad_clue" => Directive::NativeAdClue(value),

        "tidy" => Directive::Tidy(parse_boolean(&value)?),
        "prune" => Directive::Prune(parse_boolean(&value)?),
        "autodetect_on_failure" => Directive::AutodetectOnFailure(parse_boolean(&value)?),

        "single_page_link" => Directive::SinglePageLink(value),
        "next_page_link" => Directive::NextPageLink(value),

        "find_string" => Directive::FindString(value),
        "replace_string" => Directive::ReplaceString(arg, value),

        "http_header" => match arg {
            Some(name) => Directive::HttpHeader(name, value),
            None => {
                return Err(ScrapbookError::SiteConfigError(format!("Header name not set ({})", value)));
            }
        },

        "test_url" => Directive::TestUrl(value),
        "test_contains" => Directive::TestContains(value),

        _ => return Ok(None),
    };

    Ok(Some(directive))
}

fn unquote(value: &str) -> &str {
    if value.len() > 1 && value.starts_with('\'') && value.ends_with('\'') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Parse a boolean value from FTR config
fn parse_boolean(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        _ => Err(ScrapbookError::SiteConfigError(format!("Invalid boolean value: {}", value))),
    }
}
