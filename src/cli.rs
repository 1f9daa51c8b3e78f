//! CLI parsing and orchestration. Parses args, merges config, runs the crawl into the chosen
//! sink. Maps errors to exit codes.

use crate::config::{self, Config};
use crate::engine::{
    host_allowed, CrawlStats, Engine, EngineError, EngineOptions, DEFAULT_ALLOWED_HOST,
};
use crate::scraper::cambridge::CambridgeSpider;
use crate::scraper::{resolve_start_url, PoliteClient, ScraperError};
use crate::sink::{JsonArraySink, JsonLinesSink, OutputFormat, RecordSink, SinkError};
use clap::Parser;
use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DELAY_SECS: u64 = 1;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_COUNT: u32 = 3;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Sink(#[from] SinkError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Scraper(_) => 2,
            CliRunError::Engine(_) | CliRunError::Sink(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "cambridge-scrape")]
#[command(about = "Crawl Cambridge Core listings, books and articles into JSON records")]
#[command(
    after_help = "Config file keys (user_agent, request_delay_secs, timeout_secs, retry_count, retry_backoff_secs, allowed_hosts, format) are read from ./cambridge-scrape.toml or the user config directory. CLI flags override config. Set RUST_LOG to override log filtering."
)]
pub struct Args {
    /// Start URL: a listing (/core/what-we-publish/...) or a book/article page (/core/books/...).
    pub url: String,

    /// Write records to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format: jsonl (one record per line, default) or json (one array).
    #[arg(long, value_parser = parse_format)]
    pub format: Option<OutputFormat>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Delay between requests in seconds (overrides config; default 1).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Host followed links may point to; repeat for several (overrides config; default www.cambridge.org).
    #[arg(long = "allow-host", value_name = "HOST")]
    pub allow_hosts: Vec<String>,

    /// Errors only: no progress spinner, no info logs.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    match s.to_lowercase().as_str() {
        "jsonl" | "jsonlines" | "ndjson" => Ok(OutputFormat::JsonLines),
        "json" => Ok(OutputFormat::Json),
        _ => Err(format!(
            "Invalid format value: '{}'. Use jsonl or json.",
            s
        )),
    }
}

/// CLI hosts win over config hosts; with neither, only the Cambridge Core host.
fn effective_allowed_hosts(args: &Args, config: Option<&Config>) -> Vec<String> {
    if !args.allow_hosts.is_empty() {
        return args.allow_hosts.clone();
    }
    config
        .and_then(|c| c.allowed_hosts.clone())
        .unwrap_or_else(|| vec![DEFAULT_ALLOWED_HOST.to_string()])
}

fn effective_format(args: &Args, config: Option<&Config>) -> Result<OutputFormat, CliRunError> {
    if let Some(format) = args.format {
        return Ok(format);
    }
    match config.and_then(|c| c.format.as_deref()) {
        Some(s) => parse_format(s).map_err(CliRunError::InvalidInput),
        None => Ok(OutputFormat::JsonLines),
    }
}

/// The start URL's host when the offsite filter would drop requests back to it.
fn start_host_outside<'u>(start_url: &'u reqwest::Url, allowed: &[String]) -> Option<&'u str> {
    start_url
        .host_str()
        .filter(|host| !host_allowed(host, allowed))
}

/// Ensure output path parent exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>, CliRunError> {
    match path {
        Some(p) => {
            validate_output_path(p)?;
            let file = File::create(p).map_err(|e| {
                CliRunError::InvalidInput(format!("Cannot create output {}: {}", p.display(), e))
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(std::io::stdout().lock())),
    }
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let start_url = resolve_start_url(&args.url).map_err(|e| {
        CliRunError::InvalidInput(format!(
            "Expected a start URL such as https://www.cambridge.org/core/what-we-publish/books. {}",
            e
        ))
    })?;

    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let config = config.as_ref();

    let delay_secs = args
        .delay
        .or_else(|| config.and_then(|c| c.request_delay_secs))
        .unwrap_or(DEFAULT_DELAY_SECS);
    let timeout_secs = args
        .timeout
        .or_else(|| config.and_then(|c| c.timeout_secs))
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let retry_count = config
        .and_then(|c| c.retry_count)
        .unwrap_or(DEFAULT_RETRY_COUNT)
        .max(1);
    let retry_backoff_secs = config
        .and_then(|c| c.retry_backoff_secs.clone())
        .unwrap_or_else(|| vec![1, 2]);
    let user_agent = args
        .user_agent
        .clone()
        .or_else(|| config.and_then(|c| c.user_agent.clone()));

    let mut builder = PoliteClient::builder()
        .delay_secs(delay_secs)
        .timeout_secs(timeout_secs)
        .retry_count(retry_count)
        .retry_backoff_secs(retry_backoff_secs);
    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua);
    }
    let mut client = builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

    let allowed_hosts = effective_allowed_hosts(args, config);
    if let Some(host) = start_host_outside(&start_url, &allowed_hosts) {
        tracing::warn!(
            "start host {} is not in allowed hosts {:?}; links it yields will be dropped",
            host,
            allowed_hosts
        );
    }

    let progress_state: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
    let progress_cb = |stats: &CrawlStats| {
        let mut state = progress_state.borrow_mut();
        let pb = state.get_or_insert_with(|| {
            let bar = indicatif::ProgressBar::new_spinner();
            if let Ok(style) = indicatif::ProgressStyle::default_spinner()
                .template("{spinner} {msg} ({elapsed})")
            {
                bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            }
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        pb.set_message(format!(
            "{} pages fetched, {} records",
            stats.pages_fetched, stats.records_emitted
        ));
    };
    let progress: Option<&dyn Fn(&CrawlStats)> = if args.quiet {
        None
    } else {
        Some(&progress_cb)
    };

    let out = open_output(args.output.as_deref())?;
    let mut sink: Box<dyn RecordSink> = match effective_format(args, config)? {
        OutputFormat::JsonLines => Box::new(JsonLinesSink::new(out)),
        OutputFormat::Json => Box::new(JsonArraySink::new(out)),
    };

    let spider = CambridgeSpider::new()?;
    let options = EngineOptions {
        allowed_hosts,
        progress,
    };
    let mut engine = Engine::new(&mut client, spider, options);
    let result = engine.crawl(start_url, sink.as_mut());

    if let Some(pb) = progress_state.borrow_mut().take() {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }

    let stats = result?;
    match &args.output {
        Some(p) => tracing::info!("Wrote {} records to {}", stats.records_emitted, p.display()),
        None => tracing::info!("Wrote {} records", stats.records_emitted),
    }
    Ok(())
}
