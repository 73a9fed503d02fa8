//! Tool trace event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::runtime::ResourceUsage;
use crate::taint::{Sensitivity, TaintSet};

/// A single observable occurrence in a run
///
/// Events are immutable once emitted. The `type` field discriminates the
/// payload shape (see the `*Payload` structs below).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    /// Unique identifier for this event
    pub event_id: String,

    /// Run this event belongs to
    pub run_id: String,

    /// Trace ID grouping related events
    pub trace_id: String,

    /// Step (call attempt) within the run
    pub step_id: String,

    /// Tool name
    pub tool: String,

    /// Type of event
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// UTC timestamp with microsecond precision
    pub timestamp: DateTime<Utc>,

    /// Call fingerprint (set on STEP_START and terminal events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Attempt counter of the call
    #[serde(default)]
    pub attempt: u32,

    /// Event-specific payload data
    #[serde(default)]
    pub payload: Value,
}

impl ToolEvent {
    /// Create a new event with a fresh ID and the current time
    pub fn new(
        run_id: impl Into<String>,
        trace_id: impl Into<String>,
        step_id: impl Into<String>,
        tool: impl Into<String>,
        event_type: EventType,
        payload: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            trace_id: trace_id.into(),
            step_id: step_id.into(),
            tool: tool.into(),
            event_type,
            timestamp: Utc::now(),
            fingerprint: None,
            attempt: 0,
            payload,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }

    /// Read a string field from the payload
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

/// Event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "STEP_START")]
    StepStart,
    #[serde(rename = "STEP_OK")]
    StepOk,
    #[serde(rename = "STEP_FAIL")]
    StepFail,
    #[serde(rename = "log")]
    Log,
    #[serde(rename = "error")]
    Error,
}

impl EventType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::StepStart => "STEP_START",
            EventType::StepOk => "STEP_OK",
            EventType::StepFail => "STEP_FAIL",
            EventType::Log => "log",
            EventType::Error => "error",
        }
    }

    /// STEP_OK and STEP_FAIL close a step
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::StepOk | EventType::StepFail)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STEP_START" => Ok(EventType::StepStart),
            "STEP_OK" => Ok(EventType::StepOk),
            "STEP_FAIL" => Ok(EventType::StepFail),
            "log" => Ok(EventType::Log),
            "error" => Ok(EventType::Error),
            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

/// State a step entered when STEP_START was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartState {
    Executing,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStartPayload {
    pub version: String,
    pub state: StartState,
    #[serde(default)]
    pub taint: TaintSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sensitivity: Option<Sensitivity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOkPayload {
    pub usage: ResourceUsage,
    /// Truncated rendering of the output value
    pub output_summary: String,
    #[serde(default)]
    pub output_taint: TaintSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailPayload {
    /// "fail" or "blocked"
    pub outcome: String,
    pub error_code: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    pub usage: ResourceUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Non-fatal observation failure (middleware hook error or panic)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    /// Middleware that failed
    pub hook: String,
    /// Hook point: on_call_start, on_call_success or on_call_error
    pub phase: String,
    /// Type of the original error
    pub error_type: String,
    pub message: String,
}

/// Maximum characters kept in an output summary
pub const SUMMARY_LIMIT: usize = 200;

/// Render a value for a payload summary, truncated on a char boundary
pub fn summarize(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if rendered.chars().count() <= SUMMARY_LIMIT {
        rendered
    } else {
        let truncated: String = rendered.chars().take(SUMMARY_LIMIT).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_creation() {
        let event = ToolEvent::new(
            "run-1",
            "trace-1",
            "step-1",
            "write_file",
            EventType::StepStart,
            json!({"version": "1.0"}),
        )
        .with_fingerprint("sha256:abc")
        .with_attempt(2);

        assert_eq!(event.run_id, "run-1");
        assert_eq!(event.fingerprint.as_deref(), Some("sha256:abc"));
        assert_eq!(event.attempt, 2);
        assert!(!event.is_terminal());
        assert_eq!(event.payload_str("version"), Some("1.0"));
    }

    #[test]
    fn test_event_serializes_type_field() {
        let event = ToolEvent::new("r", "t", "s", "tool", EventType::StepOk, json!({}));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "STEP_OK");
        assert!(value.get("fingerprint").is_none());

        let parsed: ToolEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_type_parsing() {
        assert_eq!("STEP_FAIL".parse::<EventType>().unwrap(), EventType::StepFail);
        assert_eq!("log".parse::<EventType>().unwrap(), EventType::Log);
        assert!("step_start".parse::<EventType>().is_err());
        assert!(EventType::StepOk.is_terminal());
        assert!(!EventType::Error.is_terminal());
    }

    #[test]
    fn test_summarize_truncates_on_char_boundary() {
        let long = "é".repeat(SUMMARY_LIMIT + 10);
        let summary = summarize(&json!(long));
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), SUMMARY_LIMIT + 3);

        assert_eq!(summarize(&json!({"ok": true})), "{\"ok\":true}");
    }
}
