//! Asynchronous trace writer
//!
//! # Design
//!
//! ```text
//! write_event() ──► crossbeam channel ──► worker thread ──► TraceFile
//!      │                  (unbounded)          │
//!      │                                       ├─ flush at buffer_size
//!      └─ never blocks                         ├─ flush at flush_interval
//!                                              └─ drain + sync on Shutdown
//! ```
//!
//! Only the worker touches the file. Records are serialized on the caller
//! thread so type errors surface synchronously. A worker failure is stored
//! and returned by the next `write_event`, `flush` or `close`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};

use crate::config::WriterConfig;
use crate::error::{Result, WardenError};
use crate::trace::sink::TraceFile;
use crate::trace::sync_writer::failure_reason;
use crate::trace::writer::WriterStats;
use crate::trace::TraceRecord;

/// Commands sent to the worker thread
enum WriterCommand {
    Record(String),
    Flush(Sender<std::result::Result<(), String>>),
    Shutdown,
}

#[derive(Default)]
struct WorkerShared {
    failure: Mutex<Option<String>>,
    queued: AtomicU64,
    events_written: AtomicU64,
    flushes: AtomicU64,
}

pub struct AsyncTraceWriter {
    path: PathBuf,
    close_timeout: Duration,
    sender: Sender<WriterCommand>,
    closed: RwLock<bool>,
    shared: Arc<WorkerShared>,
    done: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncTraceWriter {
    /// Open the trace file and start the worker thread
    pub fn open(config: &WriterConfig) -> Result<Self> {
        config.validate()?;
        let file = TraceFile::open(&config.path, config.fsync)?;

        let (sender, receiver) = channel::unbounded::<WriterCommand>();
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        let shared = Arc::new(WorkerShared::default());

        let worker = Worker {
            file,
            receiver,
            buffer: Vec::with_capacity(config.buffer_size),
            buffer_size: config.buffer_size,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            last_flush: Instant::now(),
            shared: Arc::clone(&shared),
        };

        let handle = thread::Builder::new()
            .name("toolwarden-trace-writer".to_string())
            .spawn(move || {
                worker.run();
                let _ = done_tx.send(());
            })
            .map_err(|e| WardenError::writer_failed(&config.path, e))?;

        tracing::info!(
            path = %config.path.display(),
            buffer_size = config.buffer_size,
            flush_interval_ms = config.flush_interval_ms,
            "Started asynchronous trace writer"
        );

        Ok(Self {
            path: config.path.clone(),
            close_timeout: Duration::from_millis(config.close_timeout_ms),
            sender,
            closed: RwLock::new(false),
            shared,
            done: done_rx,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Enqueue one record and return immediately
    pub fn write_event(&self, record: impl Into<TraceRecord>) -> Result<()> {
        let line = record.into().to_line()?;

        // Held across the send so that close() cannot slip Shutdown in front
        // of a record that already passed the closed check.
        let closed = self.closed.read();
        if *closed {
            return Err(WardenError::WriterClosed);
        }
        self.check_failure()?;

        self.sender
            .send(WriterCommand::Record(line))
            .map_err(|_| self.worker_gone())?;
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Ask the worker to write out its buffer and wait for the result
    pub fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = channel::bounded(1);
        {
            let closed = self.closed.read();
            if *closed {
                return Err(WardenError::WriterClosed);
            }
            self.check_failure()?;
            self.sender
                .send(WriterCommand::Flush(ack_tx))
                .map_err(|_| self.worker_gone())?;
        }

        match ack_rx.recv_timeout(self.close_timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(WardenError::WriterFailed {
                path: self.path.display().to_string(),
                reason,
            }),
            Err(RecvTimeoutError::Timeout) => Err(WardenError::WriterTimeout {
                timeout_ms: self.close_timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(self.worker_gone()),
        }
    }

    /// Stop accepting records, drain the queue and wait for the worker
    ///
    /// Waits at most `close_timeout_ms`. After a timeout the worker keeps
    /// draining; every later `close` waits again and returns `Ok` only once
    /// the worker has finished and reported no failure.
    pub fn close(&self) -> Result<()> {
        {
            let mut closed = self.closed.write();
            if !*closed {
                *closed = true;
                let _ = self.sender.send(WriterCommand::Shutdown);
            }
        }

        let mut worker = self.worker.lock();
        if worker.is_none() {
            return self.check_failure();
        }

        match self.done.recv_timeout(self.close_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = worker.take() {
                    let _ = handle.join();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(
                    path = %self.path.display(),
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    pending = self.stats().pending,
                    "Trace writer did not drain before timeout"
                );
                return Err(WardenError::WriterTimeout {
                    timeout_ms: self.close_timeout.as_millis() as u64,
                });
            }
        }

        self.check_failure()?;
        tracing::info!(
            path = %self.path.display(),
            events_written = self.shared.events_written.load(Ordering::SeqCst),
            "Closed asynchronous trace writer"
        );
        Ok(())
    }

    pub fn stats(&self) -> WriterStats {
        let written = self.shared.events_written.load(Ordering::SeqCst);
        let queued = self.shared.queued.load(Ordering::SeqCst);
        WriterStats {
            events_written: written,
            flushes: self.shared.flushes.load(Ordering::SeqCst),
            pending: queued.saturating_sub(written),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    fn check_failure(&self) -> Result<()> {
        match self.shared.failure.lock().as_ref() {
            Some(reason) => Err(WardenError::WriterFailed {
                path: self.path.display().to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn worker_gone(&self) -> WardenError {
        match self.check_failure() {
            Err(err) => err,
            Ok(()) => WardenError::WriterClosed,
        }
    }
}

impl Drop for AsyncTraceWriter {
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

struct Worker {
    file: TraceFile,
    receiver: Receiver<WriterCommand>,
    buffer: Vec<String>,
    buffer_size: usize,
    flush_interval: Duration,
    last_flush: Instant,
    shared: Arc<WorkerShared>,
}

impl Worker {
    fn run(mut self) {
        loop {
            let wait = self.flush_interval.saturating_sub(self.last_flush.elapsed());
            let step = match self.receiver.recv_timeout(wait) {
                Ok(WriterCommand::Record(line)) => {
                    if self.buffer.is_empty() && self.last_flush.elapsed() >= self.flush_interval {
                        self.last_flush = Instant::now();
                    }
                    self.buffer.push(line);
                    if self.buffer.len() >= self.buffer_size
                        || self.last_flush.elapsed() >= self.flush_interval
                    {
                        self.flush()
                    } else {
                        Ok(())
                    }
                }
                Ok(WriterCommand::Flush(ack)) => {
                    let result = self.flush();
                    let _ = ack.send(result.clone());
                    result
                }
                Ok(WriterCommand::Shutdown) => {
                    let result = self.drain().and_then(|_| self.flush()).and_then(|_| self.sync());
                    if let Err(reason) = result {
                        self.fail(reason);
                    }
                    return;
                }
                Err(RecvTimeoutError::Timeout) => self.flush(),
                Err(RecvTimeoutError::Disconnected) => {
                    if let Err(reason) = self.flush() {
                        self.fail(reason);
                    }
                    return;
                }
            };

            if let Err(reason) = step {
                self.fail(reason);
                return;
            }
        }
    }

    /// Pull every record still queued behind Shutdown
    fn drain(&mut self) -> std::result::Result<(), String> {
        loop {
            match self.receiver.try_recv() {
                Ok(WriterCommand::Record(line)) => self.buffer.push(line),
                Ok(WriterCommand::Flush(ack)) => {
                    let _ = ack.send(Ok(()));
                }
                Ok(WriterCommand::Shutdown) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn flush(&mut self) -> std::result::Result<(), String> {
        self.last_flush = Instant::now();
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.file
            .append_batch(&self.buffer)
            .map_err(|e| failure_reason(&e))?;

        self.shared
            .events_written
            .fetch_add(self.buffer.len() as u64, Ordering::SeqCst);
        self.shared.flushes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(lines = self.buffer.len(), "Flushed trace batch");
        self.buffer.clear();
        Ok(())
    }

    fn sync(&mut self) -> std::result::Result<(), String> {
        self.file.sync().map_err(|e| failure_reason(&e))
    }

    fn fail(&self, reason: String) {
        tracing::error!(
            path = %self.file.path().display(),
            reason = %reason,
            "Trace writer worker failed"
        );
        *self.shared.failure.lock() = Some(reason);
    }
}
