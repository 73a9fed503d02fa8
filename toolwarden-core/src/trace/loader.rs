//! Trace Loader / Replay Indexer
//!
//! Rebuilds per-step and per-fingerprint indices from a trace file. Loading
//! is single-threaded and the indices are immutable once [`TraceLoader::open`]
//! returns, so a loader can be shared across threads for concurrent queries.
//!
//! Unparseable lines are logged and skipped: reconstruction favors
//! completeness over strictness.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WardenError};
use crate::trace::{EventType, ToolEvent, TraceHeader};

/// Everything recorded for one (run_id, step_id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAggregate {
    pub run_id: String,
    pub step_id: String,
    pub tool: String,

    /// First STEP_START seen for the step
    pub start: Option<ToolEvent>,

    /// First terminal event (STEP_OK or STEP_FAIL) seen for the step
    pub terminal: Option<ToolEvent>,

    /// Every event of the step in arrival order, including start and terminal
    pub events: Vec<ToolEvent>,
}

impl StepAggregate {
    fn new(event: &ToolEvent) -> Self {
        Self {
            run_id: event.run_id.clone(),
            step_id: event.step_id.clone(),
            tool: event.tool.clone(),
            start: None,
            terminal: None,
            events: Vec::new(),
        }
    }

    fn push(&mut self, event: ToolEvent) {
        match event.event_type {
            EventType::StepStart if self.start.is_none() => self.start = Some(event.clone()),
            EventType::StepOk | EventType::StepFail if self.terminal.is_none() => {
                self.terminal = Some(event.clone())
            }
            EventType::StepStart | EventType::StepOk | EventType::StepFail => {
                tracing::warn!(
                    run_id = %event.run_id,
                    step_id = %event.step_id,
                    event_type = %event.event_type,
                    "Duplicate step event in trace"
                );
            }
            _ => {}
        }
        self.events.push(event);
    }

    /// A step is closed once its terminal event has been seen
    pub fn is_closed(&self) -> bool {
        self.terminal.is_some()
    }

    /// "ok", "fail" or "blocked" for closed steps
    pub fn outcome(&self) -> Option<&str> {
        let terminal = self.terminal.as_ref()?;
        match terminal.event_type {
            EventType::StepOk => Some("ok"),
            _ => Some(terminal.payload_str("outcome").unwrap_or("fail")),
        }
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.start.as_ref().and_then(|e| e.fingerprint.as_deref())
    }
}

/// Counters collected while loading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderStats {
    /// Non-empty lines read
    pub lines: usize,
    /// Lines indexed as tool events
    pub events: usize,
    /// Lines that failed to parse
    pub skipped: usize,
    /// Valid records that are neither header nor tool event
    pub other_records: usize,
    /// Distinct (run_id, step_id) pairs
    pub steps: usize,
}

type StepKey = (String, String);

/// Read-only index over one trace file
#[derive(Debug)]
pub struct TraceLoader {
    path: PathBuf,
    header: Option<TraceHeader>,
    steps: HashMap<StepKey, StepAggregate>,
    order: Vec<StepKey>,
    by_fingerprint: HashMap<String, Vec<ToolEvent>>,
    stats: LoaderStats,
}

impl TraceLoader {
    /// Load and index a trace file
    ///
    /// Only failing to open or read the file is an error; malformed lines
    /// are skipped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| WardenError::IoError {
            message: format!("Failed to open trace '{}': {}", path.display(), e),
        })?;

        let mut loader = Self {
            path: path.to_path_buf(),
            header: None,
            steps: HashMap::new(),
            order: Vec::new(),
            by_fingerprint: HashMap::new(),
            stats: LoaderStats::default(),
        };

        let mut reader = BufReader::new(file);
        let mut raw = Vec::new();
        let mut line_no = 0usize;

        loop {
            raw.clear();
            let read = reader
                .read_until(b'\n', &mut raw)
                .map_err(|e| WardenError::IoError {
                    message: format!("Failed to read trace '{}': {}", path.display(), e),
                })?;
            if read == 0 {
                break;
            }
            line_no += 1;

            let text = String::from_utf8_lossy(&raw);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            loader.stats.lines += 1;

            if let Err(err) = loader.ingest(line_no, line) {
                loader.stats.skipped += 1;
                tracing::warn!(
                    path = %path.display(),
                    line = line_no,
                    error = %err,
                    "Skipping malformed trace line"
                );
            }
        }

        loader.stats.steps = loader.steps.len();
        tracing::debug!(
            path = %path.display(),
            events = loader.stats.events,
            skipped = loader.stats.skipped,
            steps = loader.stats.steps,
            "Loaded trace"
        );
        Ok(loader)
    }

    fn ingest(&mut self, line_no: usize, line: &str) -> Result<()> {
        let malformed = |reason: String| WardenError::MalformedRecord {
            line: line_no,
            reason,
        };

        let value: Value = serde_json::from_str(line).map_err(|e| malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(malformed("record is not a JSON object".to_string()));
        }

        if TraceHeader::is_header(&value) {
            let header: TraceHeader =
                serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
            if self.header.is_none() {
                self.header = Some(header);
            }
            return Ok(());
        }

        let is_event = value
            .get("type")
            .and_then(Value::as_str)
            .map(|t| t.parse::<EventType>().is_ok())
            .unwrap_or(false);
        if !is_event {
            self.stats.other_records += 1;
            return Ok(());
        }

        let event: ToolEvent = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
        self.index(event);
        Ok(())
    }

    fn index(&mut self, event: ToolEvent) {
        self.stats.events += 1;

        if event.event_type == EventType::StepStart {
            if let Some(fp) = &event.fingerprint {
                self.by_fingerprint
                    .entry(fp.clone())
                    .or_default()
                    .push(event.clone());
            }
        }

        let key = (event.run_id.clone(), event.step_id.clone());
        if !self.steps.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.steps
            .entry(key)
            .or_insert_with(|| StepAggregate::new(&event))
            .push(event);
    }

    /// Aggregate for one step
    pub fn get_step(&self, run_id: &str, step_id: &str) -> Option<&StepAggregate> {
        self.steps.get(&(run_id.to_string(), step_id.to_string()))
    }

    /// Aggregate of the first call recorded with this fingerprint
    pub fn get_by_fingerprint(&self, fingerprint: &str) -> Option<&StepAggregate> {
        let first = self.by_fingerprint.get(fingerprint)?.first()?;
        self.get_step(&first.run_id, &first.step_id)
    }

    /// Every STEP_START carrying this fingerprint, in arrival order
    pub fn starts_for_fingerprint(&self, fingerprint: &str) -> &[ToolEvent] {
        self.by_fingerprint
            .get(fingerprint)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Terminal event of the first recorded call with this fingerprint
    ///
    /// `None` when the call was never recorded or never finished.
    pub fn recorded_outcome(&self, fingerprint: &str) -> Option<&ToolEvent> {
        self.get_by_fingerprint(fingerprint)?.terminal.as_ref()
    }

    /// All step aggregates in order of first appearance
    pub fn get_all_steps(&self) -> Vec<&StepAggregate> {
        self.order.iter().filter_map(|k| self.steps.get(k)).collect()
    }

    /// Steps that started but never reached a terminal event
    pub fn open_steps(&self) -> Vec<&StepAggregate> {
        self.get_all_steps()
            .into_iter()
            .filter(|s| s.start.is_some() && s.terminal.is_none())
            .collect()
    }

    /// Steps of one run, in order of first appearance
    pub fn steps_for_run(&self, run_id: &str) -> Vec<&StepAggregate> {
        self.get_all_steps()
            .into_iter()
            .filter(|s| s.run_id == run_id)
            .collect()
    }

    pub fn header(&self) -> Option<&TraceHeader> {
        self.header.as_ref()
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
