//! Trace writer selection and the event sink contract
//!
//! The runtime only sees an [`EventSink`]. [`TraceWriter`] is the closed set
//! of file-backed sinks, chosen once from [`WriterConfig`]; [`MemorySink`]
//! keeps records in memory for tests and embedding.

use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{WriterConfig, WriterMode};
use crate::error::{Result, WardenError};
use crate::trace::{AsyncTraceWriter, SyncTraceWriter, ToolEvent, TraceRecord};

/// Destination for trace records
///
/// Errors returned from `record` are writer failures and must reach the
/// caller of the failing operation.
pub trait EventSink: Send + Sync {
    fn record(&self, record: TraceRecord) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Write out pending records whose flush interval has elapsed
    ///
    /// Sinks that flush on their own timer report `false`.
    fn flush_if_due(&self) -> Result<bool> {
        Ok(false)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Counters exposed by every writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    /// Event lines durably appended (header excluded)
    pub events_written: u64,
    /// Non-empty batches written
    pub flushes: u64,
    /// Records accepted but not yet written
    pub pending: u64,
}

/// File-backed trace writer, sync or async
pub enum TraceWriter {
    Sync(SyncTraceWriter),
    Async(AsyncTraceWriter),
}

impl TraceWriter {
    /// Open the writer variant selected by `config.mode`
    pub fn open(config: &WriterConfig) -> Result<Self> {
        match config.mode {
            WriterMode::Sync => Ok(TraceWriter::Sync(SyncTraceWriter::open(config)?)),
            WriterMode::Async => Ok(TraceWriter::Async(AsyncTraceWriter::open(config)?)),
        }
    }

    pub fn write_event(&self, record: impl Into<TraceRecord>) -> Result<()> {
        match self {
            TraceWriter::Sync(w) => w.write_event(record),
            TraceWriter::Async(w) => w.write_event(record),
        }
    }

    pub fn flush(&self) -> Result<()> {
        match self {
            TraceWriter::Sync(w) => w.flush(),
            TraceWriter::Async(w) => w.flush(),
        }
    }

    /// Interval flush for the sync variant; the async worker keeps its own timer
    pub fn flush_if_due(&self) -> Result<bool> {
        match self {
            TraceWriter::Sync(w) => w.flush_if_due(),
            TraceWriter::Async(_) => Ok(false),
        }
    }

    pub fn close(&self) -> Result<()> {
        match self {
            TraceWriter::Sync(w) => w.close(),
            TraceWriter::Async(w) => w.close(),
        }
    }

    pub fn stats(&self) -> WriterStats {
        match self {
            TraceWriter::Sync(w) => w.stats(),
            TraceWriter::Async(w) => w.stats(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            TraceWriter::Sync(w) => w.path(),
            TraceWriter::Async(w) => w.path(),
        }
    }

    pub fn mode(&self) -> WriterMode {
        match self {
            TraceWriter::Sync(_) => WriterMode::Sync,
            TraceWriter::Async(_) => WriterMode::Async,
        }
    }
}

impl EventSink for TraceWriter {
    fn record(&self, record: TraceRecord) -> Result<()> {
        self.write_event(record)
    }

    fn flush(&self) -> Result<()> {
        TraceWriter::flush(self)
    }

    fn flush_if_due(&self) -> Result<bool> {
        TraceWriter::flush_if_due(self)
    }

    fn close(&self) -> Result<()> {
        TraceWriter::close(self)
    }
}

/// In-memory sink
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<TraceRecord>>,
    closed: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }

    /// Recorded tool events, in arrival order
    pub fn events(&self) -> Vec<ToolEvent> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| r.as_event().cloned())
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.events().len()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn record(&self, record: TraceRecord) -> Result<()> {
        if *self.closed.lock() {
            return Err(WardenError::WriterClosed);
        }
        self.records.lock().push(record);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        *self.closed.lock() = true;
        Ok(())
    }
}

/// Sink that discards everything (benchmarks, dry runs)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NullSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for NullSink {
    fn record(&self, _record: TraceRecord) -> Result<()> {
        Ok(())
    }
}
