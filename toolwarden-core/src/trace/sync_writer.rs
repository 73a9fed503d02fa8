//! Synchronous trace writer
//!
//! `write_event` appends to an in-memory buffer under a mutex. When the
//! buffer reaches `buffer_size` entries, or `flush_interval` has elapsed
//! since the last flush, the same call writes the batch to disk, so the
//! caller occasionally pays for one append plus fsync.
//!
//! The interval is checked on every `write_event`; callers with long idle
//! gaps can also call [`SyncTraceWriter::flush_if_due`].

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::WriterConfig;
use crate::error::{Result, WardenError};
use crate::trace::sink::TraceFile;
use crate::trace::writer::WriterStats;
use crate::trace::TraceRecord;

struct SyncState {
    file: Option<TraceFile>,
    buffer: Vec<String>,
    last_flush: Instant,
    closed: bool,
    failure: Option<String>,
    events_written: u64,
    flushes: u64,
}

pub struct SyncTraceWriter {
    path: PathBuf,
    buffer_size: usize,
    flush_interval: Duration,
    state: Mutex<SyncState>,
}

impl SyncTraceWriter {
    /// Open the trace file and write its header if new
    pub fn open(config: &WriterConfig) -> Result<Self> {
        config.validate()?;
        let file = TraceFile::open(&config.path, config.fsync)?;

        tracing::info!(
            path = %config.path.display(),
            buffer_size = config.buffer_size,
            flush_interval_ms = config.flush_interval_ms,
            "Opened synchronous trace writer"
        );

        Ok(Self {
            path: config.path.clone(),
            buffer_size: config.buffer_size,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            state: Mutex::new(SyncState {
                file: Some(file),
                buffer: Vec::with_capacity(config.buffer_size),
                last_flush: Instant::now(),
                closed: false,
                failure: None,
                events_written: 0,
                flushes: 0,
            }),
        })
    }

    /// Buffer one record, flushing inline when a threshold is crossed
    pub fn write_event(&self, record: impl Into<TraceRecord>) -> Result<()> {
        let line = record.into().to_line()?;

        let mut state = self.state.lock();
        self.ensure_writable(&state)?;

        if state.buffer.is_empty() && state.last_flush.elapsed() >= self.flush_interval {
            state.last_flush = Instant::now();
        }
        state.buffer.push(line);

        if state.buffer.len() >= self.buffer_size
            || state.last_flush.elapsed() >= self.flush_interval
        {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }

    /// Write out everything buffered
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_writable(&state)?;
        self.flush_locked(&mut state)
    }

    /// Flush only if the interval has elapsed and something is pending
    pub fn flush_if_due(&self) -> Result<bool> {
        let mut state = self.state.lock();
        self.ensure_writable(&state)?;
        if state.buffer.is_empty() || state.last_flush.elapsed() < self.flush_interval {
            return Ok(false);
        }
        self.flush_locked(&mut state)?;
        Ok(true)
    }

    /// Drain the buffer, sync and release the file
    ///
    /// A failure is stored, so calling `close` again reports it again.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return self.stored_failure(&state);
        }
        state.closed = true;
        self.stored_failure(&state)?;

        self.flush_locked(&mut state)?;
        if let Some(mut file) = state.file.take() {
            if let Err(err) = file.sync() {
                tracing::error!(path = %self.path.display(), error = %err, "Trace sync failed");
                state.failure = Some(failure_reason(&err));
                return Err(err);
            }
        }

        tracing::info!(
            path = %self.path.display(),
            events_written = state.events_written,
            "Closed synchronous trace writer"
        );
        Ok(())
    }

    pub fn stats(&self) -> WriterStats {
        let state = self.state.lock();
        WriterStats {
            events_written: state.events_written,
            flushes: state.flushes,
            pending: state.buffer.len() as u64,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn ensure_writable(&self, state: &SyncState) -> Result<()> {
        if state.closed {
            return Err(WardenError::WriterClosed);
        }
        self.stored_failure(state)
    }

    fn stored_failure(&self, state: &SyncState) -> Result<()> {
        match &state.failure {
            Some(reason) => Err(WardenError::WriterFailed {
                path: self.path.display().to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn flush_locked(&self, state: &mut SyncState) -> Result<()> {
        state.last_flush = Instant::now();
        if state.buffer.is_empty() {
            return Ok(());
        }

        let file = match state.file.as_mut() {
            Some(file) => file,
            None => return Err(WardenError::WriterClosed),
        };

        if let Err(err) = file.append_batch(&state.buffer) {
            tracing::error!(path = %self.path.display(), error = %err, "Trace flush failed");
            state.failure = Some(failure_reason(&err));
            return Err(err);
        }

        state.events_written += state.buffer.len() as u64;
        state.flushes += 1;
        tracing::debug!(lines = state.buffer.len(), "Flushed trace batch");
        state.buffer.clear();
        Ok(())
    }
}

impl Drop for SyncTraceWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "Trace writer dropped with error"
            );
        }
    }
}

/// Reason text of a writer failure, without the path prefix
pub(crate) fn failure_reason(err: &WardenError) -> String {
    match err {
        WardenError::WriterFailed { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}
