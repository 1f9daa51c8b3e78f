//! Shared error type for the spider and HTTP client.

use thiserror::Error;

/// Scraper error for URL handling, HTTP, and page extraction.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    // HTTP and network
    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },

    #[error("Invalid request header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    // Extraction. Any of these aborts extraction of the one page that raised it.
    #[error("Invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Missing {what} ({selector}) at {url}; the page layout may have changed")]
    MissingElement {
        what: &'static str,
        selector: String,
        url: String,
    },

    #[error("Invalid page number {value:?} at {url}")]
    InvalidPageNumber { value: String, url: String },
}
