//! Blocking crawl engine. Drives a [Spider]: fetches queued requests through the polite
//! client, hands each page to the request's callback, queues the requests it returns and
//! forwards its records to a [RecordSink].
//!
//! Failures on a single request (network, HTTP status, extraction) are logged and counted; the
//! crawl moves on. Only sink errors stop it.

use crate::scraper::{Output, Page, PoliteClient, Request, ScraperError, Spider};
use crate::sink::{RecordSink, SinkError};
use reqwest::header::HeaderMap;
use reqwest::Url;
use std::collections::{HashSet, VecDeque};
use thiserror::Error;

/// Host the crawl stays on unless configured otherwise.
pub const DEFAULT_ALLOWED_HOST: &str = crate::scraper::cambridge::SITE_HOST;

/// True when `host` is one of `allowed` or a subdomain of one. An empty list allows any host.
pub fn host_allowed(host: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let host = host.to_ascii_lowercase();
    allowed.iter().any(|a| {
        let a = a.to_ascii_lowercase();
        host == a || host.ends_with(&format!(".{}", a))
    })
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Sink(#[from] SinkError),
}

/// Counters for one crawl run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub pages_fetched: u64,
    pub records_emitted: u64,
    /// Requests dropped because their fingerprint was already seen.
    pub duplicates: u64,
    /// Requests dropped because their host is not allowed.
    pub offsite: u64,
    pub http_errors: u64,
    pub network_errors: u64,
    pub parse_errors: u64,
}

pub struct EngineOptions<'a> {
    /// Hosts followed requests may target (subdomains included). Empty allows any host.
    /// The start request is never filtered.
    pub allowed_hosts: Vec<String>,
    /// Called after every handled request.
    pub progress: Option<&'a dyn Fn(&CrawlStats)>,
}

impl Default for EngineOptions<'_> {
    fn default() -> Self {
        Self {
            allowed_hosts: vec![DEFAULT_ALLOWED_HOST.to_string()],
            progress: None,
        }
    }
}

/// Duplicate-filter key: the URL without fragment and with query pairs sorted.
pub fn fingerprint(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    let mut pairs: Vec<(String, String)> = canonical
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        canonical.set_query(None);
    } else {
        pairs.sort();
        canonical.query_pairs_mut().clear().extend_pairs(pairs);
    }
    canonical.into()
}

pub struct Engine<'a, S: Spider> {
    client: &'a mut PoliteClient,
    spider: S,
    options: EngineOptions<'a>,
    queue: VecDeque<Request<S::Callback>>,
    seen: HashSet<String>,
    stats: CrawlStats,
}

impl<'a, S: Spider> Engine<'a, S> {
    pub fn new(client: &'a mut PoliteClient, spider: S, options: EngineOptions<'a>) -> Self {
        Self {
            client,
            spider,
            options,
            queue: VecDeque::new(),
            seen: HashSet::new(),
            stats: CrawlStats::default(),
        }
    }

    pub fn stats(&self) -> &CrawlStats {
        &self.stats
    }

    /// Crawl from `start` until the queue is empty. Returns the run's counters.
    pub fn crawl(&mut self, start: Url, sink: &mut dyn RecordSink) -> Result<CrawlStats, EngineError> {
        tracing::info!("crawling from {}", start);
        let start_request = self.spider.start_request(start);
        self.seen.insert(fingerprint(&start_request.url));
        self.queue.push_back(start_request);

        while let Some(request) = self.queue.pop_front() {
            let Request {
                url,
                callback,
                headers,
                ..
            } = request;

            match self.fetch(&url, &headers) {
                Ok(page) => match self.spider.parse(callback, &page) {
                    Ok(outputs) => {
                        for output in outputs {
                            match output {
                                Output::Request(next) => self.schedule(next),
                                Output::Record(record) => {
                                    sink.write_record(&record)?;
                                    self.stats.records_emitted += 1;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        self.stats.parse_errors += 1;
                        tracing::error!("extraction failed for {}: {}", page.url, e);
                    }
                },
                Err(e) => {
                    match e {
                        ScraperError::HttpStatus { .. } => self.stats.http_errors += 1,
                        _ => self.stats.network_errors += 1,
                    }
                    tracing::warn!("{}", e);
                }
            }

            if let Some(progress) = self.options.progress {
                progress(&self.stats);
            }
        }

        sink.finish()?;
        tracing::info!(
            "crawl finished: {} pages, {} records, {} duplicates, {} offsite, {} errors",
            self.stats.pages_fetched,
            self.stats.records_emitted,
            self.stats.duplicates,
            self.stats.offsite,
            self.stats.http_errors + self.stats.network_errors + self.stats.parse_errors
        );
        Ok(self.stats.clone())
    }

    /// Queue a spider-produced request unless it is offsite or a duplicate.
    fn schedule(&mut self, request: Request<S::Callback>) {
        if !self.is_allowed(&request.url) {
            tracing::debug!("dropping offsite request {}", request.url);
            self.stats.offsite += 1;
            return;
        }
        if !request.dont_filter && !self.seen.insert(fingerprint(&request.url)) {
            tracing::trace!("dropping duplicate request {}", request.url);
            self.stats.duplicates += 1;
            return;
        }
        self.queue.push_back(request);
    }

    fn is_allowed(&self, url: &Url) -> bool {
        if self.options.allowed_hosts.is_empty() {
            return true;
        }
        url.host_str()
            .is_some_and(|host| host_allowed(host, &self.options.allowed_hosts))
    }

    fn fetch(&mut self, url: &Url, headers: &HeaderMap) -> Result<Page, ScraperError> {
        tracing::debug!("fetching {}", url);
        let response =
            self.client
                .get_with_retry(url.as_str(), headers)
                .map_err(|e| ScraperError::Network {
                    url: url.to_string(),
                    source: e,
                })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let final_url = response.url().clone();
        let body = response.text().map_err(|e| ScraperError::BodyRead {
            url: url.to_string(),
            source: e,
        })?;
        self.stats.pages_fetched += 1;
        Ok(Page::new(final_url, body))
    }
}
