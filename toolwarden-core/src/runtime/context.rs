//! Per-attempt call context

use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::runtime::{CancellationToken, ResourceBudget};
use crate::taint::{TaintSet, TaintTag};
use crate::trace::{EventType, ToolEvent};

/// Identity and mutable state of one call attempt
///
/// Everything is fixed at construction except the accumulated taint (which
/// only grows) and the cancellation flag.
#[derive(Debug)]
pub struct CallContext {
    run_id: String,
    trace_id: String,
    step_family: String,
    step_id: String,
    attempt: u32,
    taint: RwLock<TaintSet>,
    cancellation: Option<CancellationToken>,
    budget: Option<ResourceBudget>,
}

impl CallContext {
    /// First attempt of a new step in `run_id`
    pub fn new(run_id: impl Into<String>) -> Self {
        let step = Uuid::new_v4().to_string();
        Self {
            run_id: run_id.into(),
            trace_id: Uuid::new_v4().to_string(),
            step_family: step.clone(),
            step_id: step,
            attempt: 1,
            taint: RwLock::new(TaintSet::new()),
            cancellation: None,
            budget: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Name the step; later attempts become `{step}/{attempt}`
    pub fn with_step_id(mut self, step_id: impl Into<String>) -> Self {
        self.step_family = step_id.into();
        self.step_id = step_id_for(&self.step_family, self.attempt);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_budget(mut self, budget: ResourceBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_taint(self, tags: &TaintSet) -> Self {
        self.add_taint(tags);
        self
    }

    /// Context for the next attempt of the same step
    ///
    /// Keeps run, trace, cancellation and budget; starts with empty taint.
    pub fn retry(&self) -> Self {
        let attempt = self.attempt + 1;
        Self {
            run_id: self.run_id.clone(),
            trace_id: self.trace_id.clone(),
            step_family: self.step_family.clone(),
            step_id: step_id_for(&self.step_family, attempt),
            attempt,
            taint: RwLock::new(TaintSet::new()),
            cancellation: self.cancellation.clone(),
            budget: self.budget.clone(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Step ID shared by every attempt
    pub fn step_family(&self) -> &str {
        &self.step_family
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn budget(&self) -> Option<&ResourceBudget> {
        self.budget.as_ref()
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false)
    }

    /// Merge tags into the accumulated taint
    pub fn add_taint(&self, tags: &TaintSet) {
        if !tags.is_empty() {
            self.taint.write().extend(tags);
        }
    }

    pub fn add_tag(&self, tag: TaintTag) {
        self.taint.write().insert(tag);
    }

    /// Snapshot of the accumulated taint
    pub fn taint(&self) -> TaintSet {
        self.taint.read().clone()
    }

    /// Event stamped with this context's identity
    pub fn event(&self, tool: &str, event_type: EventType, payload: Value) -> ToolEvent {
        ToolEvent::new(
            self.run_id.clone(),
            self.trace_id.clone(),
            self.step_id.clone(),
            tool,
            event_type,
            payload,
        )
        .with_attempt(self.attempt)
    }
}

fn step_id_for(family: &str, attempt: u32) -> String {
    if attempt <= 1 {
        family.to_string()
    } else {
        format!("{}/{}", family, attempt)
    }
}
