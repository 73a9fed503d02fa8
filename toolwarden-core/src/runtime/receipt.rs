//! Receipts and call results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::taint::TaintedData;

/// Resources consumed by one call attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Terminal outcome of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Fail,
    Blocked,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Fail => "fail",
            Outcome::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable proof of one call attempt, independent of the trace file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub run_id: String,
    pub step_id: String,
    pub attempt: u32,
    pub tool: String,
    pub tool_version: String,
    pub fingerprint: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub usage: ResourceUsage,
    pub completed_at: DateTime<Utc>,
}

/// What `ToolRuntime::invoke` returns
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub outcome: Result<TaintedData, ToolError>,
    pub usage: ResourceUsage,
    pub receipt: Receipt,
}

impl ToolResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_blocked(&self) -> bool {
        self.receipt.outcome == Outcome::Blocked
    }

    pub fn value(&self) -> Option<&TaintedData> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ToolError> {
        self.outcome.as_ref().err()
    }

    pub fn fingerprint(&self) -> &str {
        &self.receipt.fingerprint
    }

    /// Unwrap into the classified outcome
    pub fn into_result(self) -> Result<TaintedData, ToolError> {
        self.outcome
    }
}
