//! Append-only taint store keyed by run

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::taint::{Sensitivity, TaintSet};

/// Tag set recorded for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaintEntry {
    pub run_id: String,
    pub step_id: String,
    pub tool: String,
    pub tags: TaintSet,
    pub recorded_at: DateTime<Utc>,
}

impl TaintEntry {
    pub fn new(
        run_id: impl Into<String>,
        step_id: impl Into<String>,
        tool: impl Into<String>,
        tags: TaintSet,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step_id.into(),
            tool: tool.into(),
            tags,
            recorded_at: Utc::now(),
        }
    }
}

/// Audit store of tag sets
///
/// Entries are only ever appended. An entry becomes visible to readers as a
/// whole once `append` returns.
#[derive(Debug, Default)]
pub struct TaintStore {
    runs: RwLock<HashMap<String, Vec<TaintEntry>>>,
}

impl TaintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: TaintEntry) {
        self.runs
            .write()
            .entry(entry.run_id.clone())
            .or_default()
            .push(entry);
    }

    /// Entries of a run, in append order
    pub fn entries(&self, run_id: &str) -> Vec<TaintEntry> {
        self.runs.read().get(run_id).cloned().unwrap_or_default()
    }

    /// Union of every tag recorded for a run
    pub fn tags_for_run(&self, run_id: &str) -> TaintSet {
        let runs = self.runs.read();
        let mut tags = TaintSet::new();
        if let Some(entries) = runs.get(run_id) {
            for entry in entries {
                tags.extend(&entry.tags);
            }
        }
        tags
    }

    pub fn max_sensitivity(&self, run_id: &str) -> Option<Sensitivity> {
        self.tags_for_run(run_id).max_sensitivity()
    }

    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Total entries across runs
    pub fn len(&self) -> usize {
        self.runs.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
