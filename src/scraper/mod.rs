//! Spider contract and site adapter. Requests, fetched pages, the `Spider` trait the crawl
//! engine drives, the shared client, and URL helpers used by the Cambridge Core adapter.

mod client;
mod error;

pub mod cambridge;

pub use client::{PoliteClient, PoliteClientBuilder};
pub use error::ScraperError;

use crate::model::Record;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

/// Query parameter carrying the 1-based page number on paginated pages.
pub const PAGE_PARAM: &str = "pageNum";

/// A fetch the spider asks the engine to perform.
///
/// `callback` names the routine that will receive the response and carries whatever
/// context that routine needs.
#[derive(Debug)]
pub struct Request<C> {
    pub url: Url,
    pub callback: C,
    pub headers: HeaderMap,
    /// Skip the engine's duplicate filter for this request.
    pub dont_filter: bool,
}

impl<C> Request<C> {
    pub fn new(url: Url, callback: C) -> Self {
        Self {
            url,
            callback,
            headers: HeaderMap::new(),
            dont_filter: false,
        }
    }

    /// Add a request header. `name` must be a valid lower-case header name.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ScraperError> {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| ScraperError::InvalidHeader {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| ScraperError::InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    pub fn dont_filter(mut self) -> Self {
        self.dont_filter = true;
        self
    }
}

/// What a spider callback produces: more work, or a finished record.
#[derive(Debug)]
pub enum Output<C> {
    Request(Request<C>),
    Record(Record),
}

/// A fetched page: final URL after redirects and the decoded body text.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

impl Page {
    pub fn new(url: Url, body: impl Into<String>) -> Self {
        Self {
            url,
            body: body.into(),
        }
    }

    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

/// Contract between the crawl engine and a site adapter.
pub trait Spider {
    /// Typed callback (plus carried context) attached to every request.
    type Callback;

    /// Request for the user-supplied start URL.
    fn start_request(&self, url: Url) -> Request<Self::Callback>;

    /// Handle a fetched page for `callback`. An error aborts this page only.
    fn parse(
        &self,
        callback: Self::Callback,
        page: &Page,
    ) -> Result<Vec<Output<Self::Callback>>, ScraperError>;
}

/// Parse the start URL given on the command line. Requires http(s) and a host.
pub fn resolve_start_url(input: &str) -> Result<Url, ScraperError> {
    let url = Url::parse(input.trim()).map_err(|e| ScraperError::InvalidUrl {
        input: input.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ScraperError::InvalidUrl {
            input: input.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(ScraperError::InvalidUrl {
            input: input.to_string(),
            reason: "URL has no host".to_string(),
        });
    }
    Ok(url)
}

/// Parse a CSS selector or return a parse error (avoids panics from Selector::parse).
pub(crate) fn parse_selector(sel: &str) -> Result<Selector, ScraperError> {
    Selector::parse(sel).map_err(|e| ScraperError::InvalidSelector {
        selector: sel.to_string(),
        reason: e.to_string(),
    })
}

/// First non-blank direct text child of `el`, trimmed.
pub(crate) fn first_text(el: ElementRef<'_>) -> Option<String> {
    el.children()
        .filter_map(|node| node.value().as_text())
        .map(|t| t.trim())
        .find(|t| !t.is_empty())
        .map(String::from)
}

/// Text nodes below the descendants of `el`, in document order. Text sitting directly
/// inside `el` is not included.
pub(crate) fn nested_text(el: ElementRef<'_>) -> String {
    el.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent()?;
            (parent.id() != el.id()).then(|| text.to_string())
        })
        .collect()
}

/// Trim, split on newlines, trim each line, drop blank lines.
pub(crate) fn split_lines(s: &str) -> Vec<String> {
    s.trim()
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Page number from the `pageNum` query parameter; 1 when absent. Pages are 1-based, so
/// `0` is rejected along with non-numeric values.
///
/// Only read when the page has a pagination control: a one-page listing with a malformed
/// `pageNum` still extracts its links.
pub fn page_number(url: &Url) -> Result<u32, ScraperError> {
    match url.query_pairs().find(|(key, _)| key == PAGE_PARAM) {
        None => Ok(1),
        Some((_, value)) => value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| ScraperError::InvalidPageNumber {
                value: value.to_string(),
                url: url.to_string(),
            }),
    }
}

/// Copy of `url` with only the `pageNum` query parameter set to `page`.
///
/// Scheme, host, path, fragment and every other query pair are kept in their original
/// order. A missing `pageNum` is appended; repeated ones collapse into the first.
pub fn with_page_number(url: &Url, page: u32) -> Url {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut replaced = false;
    for (key, value) in url.query_pairs() {
        if key == PAGE_PARAM {
            if !replaced {
                pairs.push((PAGE_PARAM.to_string(), page.to_string()));
                replaced = true;
            }
        } else {
            pairs.push((key.into_owned(), value.into_owned()));
        }
    }
    if !replaced {
        pairs.push((PAGE_PARAM.to_string(), page.to_string()));
    }
    let mut out = url.clone();
    out.query_pairs_mut().clear().extend_pairs(pairs);
    out
}

/// `path` on the origin (scheme, host, port) of `base`, without query or fragment.
pub fn with_path(base: &Url, path: &str) -> Url {
    let mut out = base.clone();
    out.set_path(path);
    out.set_query(None);
    out.set_fragment(None);
    out
}

/// Resolve `href` against `base` and keep only its path on `base`'s origin.
pub fn resolve_path(base: &Url, href: &str) -> Result<Url, ScraperError> {
    let joined = base.join(href.trim()).map_err(|e| ScraperError::InvalidUrl {
        input: href.to_string(),
        reason: e.to_string(),
    })?;
    Ok(with_path(base, joined.path()))
}

/// Highest page number from the pagination control (`data-page-number` of its last entry).
/// `None` when the page has no pagination control.
pub(crate) fn last_page_number(doc: &Html, url: &Url) -> Result<Option<u32>, ScraperError> {
    let last_sel = parse_selector("ul.pagination > li:last-child > a")?;
    let value = match doc
        .select(&last_sel)
        .next()
        .and_then(|a| a.value().attr("data-page-number"))
    {
        Some(v) => v,
        None => return Ok(None),
    };
    value
        .trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|_| ScraperError::InvalidPageNumber {
            value: value.to_string(),
            url: url.to_string(),
        })
}
