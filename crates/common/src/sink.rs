use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::info;

use crate::error::SinkError;
use crate::Sample;

/// Row-oriented output: an optional header, then one row per sample.
pub trait RowSink {
    fn write_header(&mut self, fields: &[String]) -> Result<(), SinkError>;
    fn write_row(&mut self, sample: &Sample) -> Result<(), SinkError>;
    fn flush(&mut self) -> Result<(), SinkError>;
}

impl<S: RowSink + ?Sized> RowSink for Box<S> {
    fn write_header(&mut self, fields: &[String]) -> Result<(), SinkError> {
        (**self).write_header(fields)
    }
    fn write_row(&mut self, sample: &Sample) -> Result<(), SinkError> {
        (**self).write_row(sample)
    }
    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// CSV writer. Each row is flushed so an interrupted run keeps what it has.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    columns: Vec<String>,
    rows: usize,
}

impl CsvSink<File> {
    pub fn create(path: impl AsRef<Path>, columns: Vec<String>) -> Result<Self, SinkError> {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        Ok(Self {
            writer,
            columns,
            rows: 0,
        })
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(inner: W, columns: Vec<String>) -> Self {
        Self {
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(inner),
            columns,
            rows: 0,
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write> RowSink for CsvSink<W> {
    fn write_header(&mut self, fields: &[String]) -> Result<(), SinkError> {
        self.writer.write_record(fields)?;
        self.writer.flush()?;
        Ok(())
    }

    fn write_row(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let record: Vec<String> = self
            .columns
            .iter()
            .map(|name| sample.get(name).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        self.writer.write_record(&record)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        info!("Saved {} records", self.rows);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Captured {
    header: Option<Vec<String>>,
    rows: Vec<Sample>,
    flushes: usize,
}

/// Keeps everything in memory. Clones share the same buffer, so a test can
/// hand one to the engine and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    captured: Arc<Mutex<Captured>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self) -> Option<Vec<String>> {
        self.captured.lock().ok().and_then(|c| c.header.clone())
    }

    pub fn rows(&self) -> Vec<Sample> {
        self.captured
            .lock()
            .map(|c| c.rows.clone())
            .unwrap_or_default()
    }

    pub fn flushes(&self) -> usize {
        self.captured.lock().map(|c| c.flushes).unwrap_or(0)
    }
}

impl RowSink for MemorySink {
    fn write_header(&mut self, fields: &[String]) -> Result<(), SinkError> {
        if let Ok(mut captured) = self.captured.lock() {
            captured.header = Some(fields.to_vec());
        }
        Ok(())
    }

    fn write_row(&mut self, sample: &Sample) -> Result<(), SinkError> {
        if let Ok(mut captured) = self.captured.lock() {
            captured.rows.push(sample.clone());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Ok(mut captured) = self.captured.lock() {
            captured.flushes += 1;
        }
        Ok(())
    }
}
