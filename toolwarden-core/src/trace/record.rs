//! Trace records and line conversion
//!
//! A trace line is one JSON object. Records reach the writer in three
//! shapes: a [`ToolEvent`], the file [`TraceHeader`], or a plain key/value
//! map (which also covers serde tagged unions, see
//! [`TraceRecord::from_serializable`]). Anything that does not serialize to
//! a JSON object is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WardenError};
use crate::trace::ToolEvent;

/// Version of the trace line format
pub const SCHEMA_VERSION: &str = "1.0";

/// `type` value of the header line
pub const HEADER_TYPE: &str = "trace_header";

/// First line of every trace file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceHeader {
    #[serde(rename = "type")]
    pub record_type: String,
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
}

impl TraceHeader {
    pub fn new() -> Self {
        Self {
            record_type: HEADER_TYPE.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Whether a parsed JSON object is a header line
    pub fn is_header(value: &Value) -> bool {
        value.get("type").and_then(Value::as_str) == Some(HEADER_TYPE)
    }
}

impl Default for TraceHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything the writer accepts as one line
#[derive(Debug, Clone, PartialEq)]
pub enum TraceRecord {
    Event(ToolEvent),
    Header(TraceHeader),
    Map(Map<String, Value>),
}

impl TraceRecord {
    /// Accept a JSON value; only objects are valid records
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(TraceRecord::Map(map)),
            other => Err(WardenError::InvalidRecord {
                found: json_kind(&other).to_string(),
            }),
        }
    }

    /// Accept any serializable structure or tagged enum
    ///
    /// ```rust
    /// use serde::Serialize;
    /// use toolwarden_core::trace::TraceRecord;
    ///
    /// #[derive(Serialize)]
    /// #[serde(tag = "type")]
    /// enum Marker {
    ///     Checkpoint { label: String },
    /// }
    ///
    /// let record = TraceRecord::from_serializable(&Marker::Checkpoint {
    ///     label: "phase-1".into(),
    /// })
    /// .unwrap();
    /// assert!(record.to_line().unwrap().contains("\"type\":\"Checkpoint\""));
    ///
    /// assert!(TraceRecord::from_serializable(&42).is_err());
    /// ```
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::from_value(serde_json::to_value(value)?)
    }

    /// Serialize as one line, without the trailing newline
    pub fn to_line(&self) -> Result<String> {
        let line = match self {
            TraceRecord::Event(event) => serde_json::to_string(event)?,
            TraceRecord::Header(header) => serde_json::to_string(header)?,
            TraceRecord::Map(map) => serde_json::to_string(map)?,
        };
        Ok(line)
    }

    pub fn as_event(&self) -> Option<&ToolEvent> {
        match self {
            TraceRecord::Event(event) => Some(event),
            _ => None,
        }
    }
}

impl From<ToolEvent> for TraceRecord {
    fn from(event: ToolEvent) -> Self {
        TraceRecord::Event(event)
    }
}

impl From<TraceHeader> for TraceRecord {
    fn from(header: TraceHeader) -> Self {
        TraceRecord::Header(header)
    }
}

impl From<Map<String, Value>> for TraceRecord {
    fn from(map: Map<String, Value>) -> Self {
        TraceRecord::Map(map)
    }
}

impl TryFrom<Value> for TraceRecord {
    type Error = WardenError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
