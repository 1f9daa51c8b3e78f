//! Record sinks: where finished records go. JSON Lines (streamed) or a single JSON array.

use crate::model::Record;
use std::io::Write;
use thiserror::Error;

/// Output format selector for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON object per line, written as records arrive.
    JsonLines,
    /// One pretty-printed JSON array, written when the crawl ends.
    Json,
}

/// Errors from the record sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receives finished records from the crawl engine.
pub trait RecordSink {
    fn write_record(&mut self, record: &Record) -> Result<(), SinkError>;

    /// Called once after the last record.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Streams each record as one line of JSON and flushes after every record.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn write_record(&mut self, record: &Record) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Buffers records and writes them as one JSON array on `finish`.
pub struct JsonArraySink<W: Write> {
    out: W,
    records: Vec<Record>,
}

impl<W: Write> JsonArraySink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            records: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for JsonArraySink<W> {
    fn write_record(&mut self, record: &Record) -> Result<(), SinkError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        serde_json::to_writer_pretty(&mut self.out, &self.records)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// In-memory sink.
impl RecordSink for Vec<Record> {
    fn write_record(&mut self, record: &Record) -> Result<(), SinkError> {
        self.push(record.clone());
        Ok(())
    }
}
