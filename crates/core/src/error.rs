//! Error types for Scrapbook operations.
//!
//! This module defines the main error type [`ScrapbookError`] which represents
//! all possible errors that can occur while fetching, extracting, archiving
//! and transcoding.
//!
//! # Example
//!
//! ```rust
//! use scrapbook_core::{ScrapbookError, Result};
//!
//! fn require_body(html: &str) -> Result<&str> {
//!     if html.is_empty() {
//!         return Err(ScrapbookError::HtmlParseError("empty document".into()));
//!     }
//!     Ok(html)
//! }
//! ```

use std::path::PathBuf;
use sxd_xpath::ExecutionError;
use thiserror::Error;

/// Main error type for extraction and archival operations.
///
/// Errors raised inside a processor never abort an extraction on their own;
/// they are logged on the run. Errors returned from [`crate::Extractor::run`]
/// helpers, the archiver or the transcoder are propagated to the caller.
#[derive(Error, Debug)]
pub enum ScrapbookError {
    /// HTTP request errors from reqwest.
    ///
    /// This variant wraps network errors, DNS failures, connection issues,
    /// and other HTTP-related problems.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Request timeout.
    #[error("Request timed out after {timeout} seconds")]
    Timeout { timeout: u64 },

    /// Remote server answered with a non 2xx status.
    #[error("Invalid status code ({status})")]
    InvalidStatus { status: u16 },

    /// Invalid URL provided.
    ///
    /// Returned when a URL cannot be parsed, is relative, or has no host.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A request was redirected more times than allowed.
    #[error("Too many redirects (more than {max})")]
    TooManyRedirects { max: usize },

    /// The destination resolves to a denied network block.
    #[error("Destination not allowed: {0}")]
    DestinationDenied(String),

    /// HTML parsing errors.
    #[error("Failed to parse HTML: {0}")]
    HtmlParseError(String),

    /// The best content candidate scored too low.
    ///
    /// This typically happens on navigation pages, search results,
    /// or pages with very little text content.
    #[error("Content is not readable (score {score} below threshold {threshold})")]
    NotReadable { score: f64, threshold: f64 },

    /// No content could be extracted from the document.
    #[error("No content could be extracted from the document")]
    NoContent,

    /// Invalid character encoding.
    #[error("Invalid character encoding")]
    InvalidEncoding,

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid settings.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Site configuration errors.
    ///
    /// Returned when a site rule file cannot be decoded.
    #[error("Site configuration error: {0}")]
    SiteConfigError(String),

    /// XPath compilation or evaluation errors.
    #[error("XPath error: {0}")]
    XPathError(String),

    /// Image decoding, filtering or encoding errors.
    #[error("Image error: {0}")]
    ImageError(String),

    /// Archive container errors.
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// JSON (de)serialization errors.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// [`crate::Extractor::replace_drop`] called on a multi-page extraction.
    #[error("cannot replace a drop when there are more than one")]
    TooManyDrops,

    /// The extraction was cancelled by a processor.
    #[error("Extraction cancelled: {0}")]
    Cancelled(String),
}

impl From<ExecutionError> for ScrapbookError {
    fn from(err: ExecutionError) -> Self {
        ScrapbookError::XPathError(err.to_string())
    }
}

impl From<image::ImageError> for ScrapbookError {
    fn from(err: image::ImageError) -> Self {
        ScrapbookError::ImageError(err.to_string())
    }
}

impl From<zip::result::ZipError> for ScrapbookError {
    fn from(err: zip::result::ZipError) -> Self {
        ScrapbookError::ArchiveError(err.to_string())
    }
}

/// Result type alias for ScrapbookError.
pub type Result<T> = std::result::Result<T, ScrapbookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScrapbookError::InvalidUrl("not a url".to_string());
        assert!(err.to_string().contains("Invalid URL"));
    }

    #[test]
    fn test_status_error() {
        let err = ScrapbookError::InvalidStatus { status: 404 };
        assert_eq!(err.to_string(), "Invalid status code (404)");
    }

    #[test]
    fn test_timeout_error() {
        let err = ScrapbookError::Timeout { timeout: 30 };
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_not_readable_error() {
        let err = ScrapbookError::NotReadable { score: 15.0, threshold: 20.0 };
        assert!(err.to_string().contains("15"));
        assert!(err.to_string().contains("20"));
    }

    #[test]
    fn test_too_many_drops() {
        assert_eq!(
            ScrapbookError::TooManyDrops.to_string(),
            "cannot replace a drop when there are more than one"
        );
    }
}
