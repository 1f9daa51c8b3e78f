//! cambridge-scrape: crawler for Cambridge Core book and article pages, emitting bibliographic
//! records as JSON.

pub mod cli;
pub mod config;
pub mod engine;
pub mod logging;
pub mod model;
pub mod scraper;
pub mod sink;

// Re-exports for CLI and consumers.
pub use engine::{CrawlStats, Engine, EngineError, EngineOptions};
pub use model::{ArticleRecord, BookRecord, Record, RecordBase};
pub use scraper::cambridge::{CambridgeCallback, CambridgeSpider};
pub use scraper::{
    resolve_start_url, Output, Page, PoliteClient, PoliteClientBuilder, Request, ScraperError,
    Spider,
};
pub use sink::{JsonArraySink, JsonLinesSink, OutputFormat, RecordSink, SinkError};
