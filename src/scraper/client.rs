//! Blocking HTTP client with configurable politeness (delay between requests) and retries.

use reqwest::header::HeaderMap;
use std::time::{Duration, Instant};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; cambridge-scrape/0.1; +https://github.com/cambridge-scrape)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_SECS: u64 = 1;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts for get_with_retry (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default backoff delays in seconds after each failed attempt.
const DEFAULT_BACKOFF_SECS: [u64; 2] = [1, 2];
/// Backoff for HTTP 429 (rate limit): wait longer so the server can recover.
const BACKOFF_429_SECS: [u64; 4] = [30, 60, 90, 120];

/// Blocking HTTP client that enforces a delay between requests.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_request: Option<Instant>,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl PoliteClient {
    /// Build a polite client with default User-Agent, timeout, and delay.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// GET `url` with extra request headers, retrying transient failures.
    ///
    /// Retries on: timeout, connection errors, HTTP 5xx, and HTTP 429. Other statuses are
    /// returned to the caller as-is. Sleeps until the configured delay has passed since the
    /// last request before every attempt.
    pub fn get_with_retry(
        &mut self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<reqwest::blocking::Response, reqwest::Error> {
        let max_attempts = self.retry_count.max(1);
        let mut attempt = 0;
        loop {
            self.wait_delay();
            let result = self.inner.get(url).headers(headers.clone()).send();
            self.last_request = Some(Instant::now());
            let last_attempt = attempt + 1 >= max_attempts;
            match result {
                Ok(response) => {
                    let status = response.status();
                    let rate_limited = status.as_u16() == 429;
                    if (status.is_server_error() || rate_limited) && !last_attempt {
                        let backoff = if rate_limited {
                            BACKOFF_429_SECS
                                .get(attempt as usize)
                                .copied()
                                .unwrap_or(BACKOFF_429_SECS[BACKOFF_429_SECS.len() - 1])
                        } else {
                            self.backoff_for(attempt)
                        };
                        tracing::debug!(
                            "HTTP {} from {}; retrying in {}s (attempt {}/{})",
                            status.as_u16(),
                            url,
                            backoff,
                            attempt + 1,
                            max_attempts
                        );
                        std::thread::sleep(Duration::from_secs(backoff));
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    if retryable && !last_attempt {
                        let backoff = self.backoff_for(attempt);
                        tracing::debug!(
                            "request to {} failed: {}; retrying in {}s (attempt {}/{})",
                            url,
                            e,
                            backoff,
                            attempt + 1,
                            max_attempts
                        );
                        std::thread::sleep(Duration::from_secs(backoff));
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    fn backoff_for(&self, attempt: u32) -> u64 {
        self.backoff_secs
            .get(attempt as usize)
            .or_else(|| self.backoff_secs.last())
            .copied()
            .unwrap_or(1)
    }

    fn wait_delay(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
    }
}

/// Builder for PoliteClient with optional User-Agent, delay, timeout, and retry settings.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    delay_secs: u64,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_secs: DEFAULT_DELAY_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl PoliteClientBuilder {
    /// Set a custom User-Agent. If not set, a browser-like default is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Set delay between requests in seconds. Default 1; 0 disables the delay.
    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }

    /// Set request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set number of HTTP attempts for transient failures (default 3).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Set backoff delays in seconds before each retry (e.g. [1, 2, 4]). If shorter than
    /// retry_count - 1, the last value is reused.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    /// Build the blocking client and polite wrapper.
    pub fn build(self) -> Result<PoliteClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            // Exponential: 1, 2, 4, ... for (retry_count - 1) steps
            let n = self.retry_count.saturating_sub(1) as usize;
            (0..n).map(|i| 1u64 << i.min(4)).collect::<Vec<_>>()
        } else {
            self.retry_backoff_secs
        };
        Ok(PoliteClient {
            inner,
            delay: Duration::from_secs(self.delay_secs),
            last_request: None,
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_backoff_falls_back_to_exponential() -> Result<(), reqwest::Error> {
        let client = PoliteClient::builder()
            .retry_count(4)
            .retry_backoff_secs(Vec::new())
            .build()?;
        assert_eq!(client.backoff_secs, vec![1, 2, 4]);
        assert_eq!(client.backoff_for(0), 1);
        assert_eq!(client.backoff_for(7), 4);
        Ok(())
    }

    #[test]
    fn retry_count_is_at_least_one() -> Result<(), reqwest::Error> {
        let client = PoliteClient::builder().retry_count(0).build()?;
        assert_eq!(client.retry_count, 1);
        Ok(())
    }
}
