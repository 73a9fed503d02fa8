//! Append-only trace file
//!
//! Owned by exactly one writer. Each batch is concatenated and handed to
//! the OS in a single `write_all`, so a batch is either fully visible or
//! (on crash) lost as a whole from the buffer; earlier lines are never
//! rewritten.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, WardenError};
use crate::trace::{TraceHeader, TraceRecord};

pub(crate) struct TraceFile {
    path: PathBuf,
    file: File,
    fsync: bool,
}

impl TraceFile {
    /// Open (or create) a trace file for appending
    ///
    /// The header is written only when the file is empty, so reopening an
    /// existing trace continues it instead of starting a second header.
    pub(crate) fn open(path: &Path, fsync: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| WardenError::writer_failed(path, e))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| WardenError::writer_failed(path, e))?;

        let len = file
            .metadata()
            .map_err(|e| WardenError::writer_failed(path, e))?
            .len();

        let mut trace_file = Self {
            path: path.to_path_buf(),
            file,
            fsync,
        };

        if len == 0 {
            let header = TraceRecord::from(TraceHeader::new()).to_line()?;
            trace_file.append_batch(&[header])?;
            tracing::debug!(path = %path.display(), "Created trace file");
        }

        Ok(trace_file)
    }

    /// Write a batch of lines as one append
    pub(crate) fn append_batch(&mut self, lines: &[String]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }

        let capacity = lines.iter().map(|l| l.len() + 1).sum();
        let mut chunk = String::with_capacity(capacity);
        for line in lines {
            chunk.push_str(line);
            chunk.push('\n');
        }

        self.file
            .write_all(chunk.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|e| WardenError::writer_failed(&self.path, e))?;

        if self.fsync {
            self.sync()?;
        }
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| WardenError::writer_failed(&self.path, e))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_written_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("trace.jsonl");

        {
            let mut file = TraceFile::open(&path, false).unwrap();
            file.append_batch(&["{\"n\":1}".to_string()]).unwrap();
        }
        {
            let mut file = TraceFile::open(&path, true).unwrap();
            file.append_batch(&["{\"n\":2}".to_string()]).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("trace_header"));
        assert_eq!(lines[1], "{\"n\":1}");
        assert_eq!(lines[2], "{\"n\":2}");
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let mut file = TraceFile::open(&path, false).unwrap();
        file.append_batch(&[]).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }
}
