//! Error types for Toolwarden operations
//!
//! Two layers of failure exist in the pipeline:
//!
//! - [`WardenError`] is returned by infrastructure operations (writers,
//!   loaders, configuration, registry lookups). Writer failures are fatal to
//!   the writer instance and always reach the caller of the failing call.
//! - [`ToolError`] is the classified, serializable failure carried inside a
//!   [`ToolResult`](crate::runtime::ToolResult). Callers of
//!   `ToolRuntime::invoke` never see a raw transport error.
//!
//! # Error Codes
//!
//! Every variant maps to a stable, uppercase code (e.g. `WRITER_CLOSED`)
//! that is written into trace events and receipts.
//!
//! # Example
//!
//! ```rust
//! use toolwarden_core::error::{WardenError, ErrorCategory};
//!
//! let err = WardenError::WriterClosed;
//! assert_eq!(err.error_code(), "WRITER_CLOSED");
//! assert_eq!(err.category(), ErrorCategory::Writer);
//! assert!(!err.is_recoverable());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Toolwarden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Input validation failed
    Validation,
    /// Denied by DLP or another policy
    Policy,
    /// The tool itself failed
    Transport,
    /// Trace writer failure (fatal to the writer)
    Writer,
    /// Trace file content could not be parsed
    Integrity,
    /// Resource budget or cancellation
    Budget,
    /// Resource not found
    NotFound,
    /// Internal error
    Internal,
}

/// Errors that can occur in Toolwarden operations
#[derive(Error, Debug)]
pub enum WardenError {
    // ═══════════════════════════════════════════════════════════════════════
    // Call pipeline errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Arguments do not satisfy the tool's schema
    #[error("Validation failed for tool '{tool}': {reason}")]
    Validation { tool: String, reason: String },

    /// Call denied by a policy stage
    #[error("Policy violation on tool '{tool}' ({policy}): {reason}")]
    PolicyViolation {
        tool: String,
        policy: String,
        reason: String,
    },

    /// The transport failed to execute the tool
    #[error("Transport failed for tool '{tool}': {reason}")]
    Transport { tool: String, reason: String },

    /// Tool is not registered
    #[error("Tool not found: '{name}' (version {version}). Register it with ToolRegistry::register() first.")]
    ToolNotFound { name: String, version: String },

    /// Tool was registered twice
    #[error("Tool already registered: '{name}' (version {version})")]
    ToolAlreadyRegistered { name: String, version: String },

    /// Declassification was requested without a usable justification
    #[error("Declassification rejected: {reason}")]
    InvalidDeclassification { reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Trace errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Write attempted after close()
    #[error("Trace writer closed. Create a new writer to continue recording.")]
    WriterClosed,

    /// Writer failed on its destination (disk full, permission denied, ...)
    #[error("Trace writer failed on '{path}': {reason}")]
    WriterFailed { path: String, reason: String },

    /// Async writer did not drain before the close timeout
    #[error("Trace writer did not drain within {timeout_ms}ms")]
    WriterTimeout { timeout_ms: u64 },

    /// Record is not an event, tagged union or key/value map
    #[error("Invalid trace record: expected an event or a key/value map, got {found}")]
    InvalidRecord { found: String },

    /// A trace line could not be parsed
    #[error("Malformed trace record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// Two different argument sets produced one fingerprint
    #[error("Fingerprint collision on '{fingerprint}' for tool '{tool}'")]
    FingerprintCollision { fingerprint: String, tool: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Budget errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Deadline, token or cost ceiling breached
    #[error("Resource budget exceeded: {reason}")]
    BudgetExceeded { reason: String },

    /// Call was cancelled cooperatively
    #[error("Call cancelled: {reason}")]
    Cancelled { reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Invalid configuration value
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// I/O operation failed
    #[error("IO error: {message}")]
    IoError { message: String },

    /// Internal error that shouldn't happen
    #[error("Internal error: {reason}. This is a bug; please report it.")]
    InternalError { reason: String },
}

impl WardenError {
    /// Returns true if this error might succeed on retry
    ///
    /// Transport failures and budget breaches may succeed on a new attempt.
    /// Writer failures are fatal to the writer instance and never recover.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WardenError::Transport { .. }
                | WardenError::BudgetExceeded { .. }
                | WardenError::MalformedRecord { .. }
                | WardenError::FingerprintCollision { .. }
        )
    }

    /// Returns true for errors that end the life of a trace writer
    pub fn is_writer_fatal(&self) -> bool {
        matches!(
            self,
            WardenError::WriterClosed
                | WardenError::WriterFailed { .. }
                | WardenError::WriterTimeout { .. }
        )
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            WardenError::Validation { .. }
            | WardenError::InvalidRecord { .. }
            | WardenError::InvalidDeclassification { .. }
            | WardenError::Config { .. } => ErrorCategory::Validation,

            WardenError::PolicyViolation { .. } => ErrorCategory::Policy,

            WardenError::Transport { .. } => ErrorCategory::Transport,

            WardenError::WriterClosed
            | WardenError::WriterFailed { .. }
            | WardenError::WriterTimeout { .. }
            | WardenError::IoError { .. } => ErrorCategory::Writer,

            WardenError::MalformedRecord { .. }
            | WardenError::FingerprintCollision { .. }
            | WardenError::JsonError(_) => ErrorCategory::Integrity,

            WardenError::BudgetExceeded { .. } | WardenError::Cancelled { .. } => {
                ErrorCategory::Budget
            }

            WardenError::ToolNotFound { .. } => ErrorCategory::NotFound,

            WardenError::ToolAlreadyRegistered { .. } | WardenError::InternalError { .. } => {
                ErrorCategory::Internal
            }
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            WardenError::Validation { .. } => codes::VALIDATION_ERROR,
            WardenError::PolicyViolation { .. } => codes::POLICY_VIOLATION,
            WardenError::Transport { .. } => codes::TRANSPORT_ERROR,
            WardenError::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            WardenError::ToolAlreadyRegistered { .. } => "TOOL_ALREADY_REGISTERED",
            WardenError::InvalidDeclassification { .. } => "INVALID_DECLASSIFICATION",
            WardenError::WriterClosed => codes::WRITER_CLOSED,
            WardenError::WriterFailed { .. } => "WRITER_FAILED",
            WardenError::WriterTimeout { .. } => "WRITER_TIMEOUT",
            WardenError::InvalidRecord { .. } => "INVALID_RECORD",
            WardenError::MalformedRecord { .. } => codes::MALFORMED_RECORD,
            WardenError::FingerprintCollision { .. } => codes::FINGERPRINT_COLLISION,
            WardenError::BudgetExceeded { .. } => codes::BUDGET_EXCEEDED,
            WardenError::Cancelled { .. } => codes::CANCELLED,
            WardenError::Config { .. } => "CONFIG_ERROR",
            WardenError::JsonError(_) => "JSON_ERROR",
            WardenError::IoError { .. } => "IO_ERROR",
            WardenError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Converts this error to a JSON-serializable response object
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                category: self.category(),
                recoverable: self.is_recoverable(),
            },
        }
    }

    pub(crate) fn writer_failed(path: &std::path::Path, err: std::io::Error) -> Self {
        WardenError::WriterFailed {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Stable codes shared by trace events, receipts and errors
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const POLICY_VIOLATION: &str = "POLICY_VIOLATION";
    pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";
    pub const WRITER_CLOSED: &str = "WRITER_CLOSED";
    pub const MALFORMED_RECORD: &str = "MALFORMED_RECORD";
    pub const FINGERPRINT_COLLISION: &str = "FINGERPRINT_COLLISION";
    pub const BUDGET_EXCEEDED: &str = "BUDGET_EXCEEDED";
    pub const CANCELLED: &str = "CANCELLED";
    pub const MIDDLEWARE_FAILURE: &str = "MIDDLEWARE_FAILURE";
    pub const DLP_FLAG: &str = "DLP_FLAG";
    pub const DECLASSIFIED: &str = "DECLASSIFIED";
}

/// Kind of a classified call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Validation,
    PolicyViolation,
    Transport,
    BudgetExceeded,
    Cancelled,
}

impl ToolErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ToolErrorKind::Validation => codes::VALIDATION_ERROR,
            ToolErrorKind::PolicyViolation => codes::POLICY_VIOLATION,
            ToolErrorKind::Transport => codes::TRANSPORT_ERROR,
            ToolErrorKind::BudgetExceeded => codes::BUDGET_EXCEEDED,
            ToolErrorKind::Cancelled => codes::CANCELLED,
        }
    }

    /// Whether this kind of failure happens before the transport runs
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            ToolErrorKind::Validation | ToolErrorKind::PolicyViolation
        )
    }
}

/// Classified failure of one tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub code: String,
    pub message: String,
    /// Policy or validator that produced the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code().to_string(),
            message: message.into(),
            source_name: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Validation, message)
    }

    pub fn policy(policy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::PolicyViolation, message).with_source(policy)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Transport, message)
    }

    pub fn budget(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::BudgetExceeded, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Cancelled, message)
    }

    /// Override the default code for this kind
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_name = Some(source.into());
        self
    }

    /// Lift into the crate error for callers that prefer `?`
    pub fn into_warden_error(self, tool: &str) -> WardenError {
        let source = self.source_name.unwrap_or_else(|| "unknown".to_string());
        match self.kind {
            ToolErrorKind::Validation => WardenError::Validation {
                tool: tool.to_string(),
                reason: self.message,
            },
            ToolErrorKind::PolicyViolation => WardenError::PolicyViolation {
                tool: tool.to_string(),
                policy: source,
                reason: self.message,
            },
            ToolErrorKind::Transport => WardenError::Transport {
                tool: tool.to_string(),
                reason: self.message,
            },
            ToolErrorKind::BudgetExceeded => WardenError::BudgetExceeded {
                reason: self.message,
            },
            ToolErrorKind::Cancelled => WardenError::Cancelled {
                reason: self.message,
            },
        }
    }
}

/// JSON-serializable error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail for JSON responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code (e.g., "WRITER_CLOSED")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    pub category: ErrorCategory,
    /// Whether retry might succeed
    pub recoverable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_recoverable() {
        assert!(WardenError::Transport {
            tool: "t".to_string(),
            reason: "timeout".to_string()
        }
        .is_recoverable());
        assert!(!WardenError::WriterClosed.is_recoverable());
        assert!(!WardenError::PolicyViolation {
            tool: "t".to_string(),
            policy: "dlp".to_string(),
            reason: "secret".to_string()
        }
        .is_recoverable());
    }

    #[test]
    fn test_writer_fatal() {
        assert!(WardenError::WriterClosed.is_writer_fatal());
        assert!(WardenError::WriterFailed {
            path: "/tmp/x".to_string(),
            reason: "disk full".to_string()
        }
        .is_writer_fatal());
        assert!(!WardenError::Config {
            reason: "bad".to_string()
        }
        .is_writer_fatal());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(WardenError::WriterClosed.error_code(), "WRITER_CLOSED");
        assert_eq!(
            WardenError::MalformedRecord {
                line: 3,
                reason: "eof".to_string()
            }
            .error_code(),
            "MALFORMED_RECORD"
        );
        assert_eq!(
            WardenError::FingerprintCollision {
                fingerprint: "sha256:00".to_string(),
                tool: "t".to_string()
            }
            .error_code(),
            "FINGERPRINT_COLLISION"
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            WardenError::Validation {
                tool: "t".to_string(),
                reason: "r".to_string()
            }
            .category(),
            ErrorCategory::Validation
        );
        assert_eq!(WardenError::WriterClosed.category(), ErrorCategory::Writer);
        assert_eq!(
            WardenError::Cancelled {
                reason: "s".to_string()
            }
            .category(),
            ErrorCategory::Budget
        );
    }

    #[test]
    fn test_cancelled_tool_error_keeps_reason() {
        let err = ToolError::cancelled("run aborted by operator").into_warden_error("fetch");
        assert!(matches!(err, WardenError::Cancelled { .. }));
        assert_eq!(err.to_string(), "Call cancelled: run aborted by operator");
        assert_eq!(err.error_code(), "CANCELLED");
    }

    #[test]
    fn test_tool_error_codes_follow_kind() {
        let err = ToolError::policy("dlp", "secret data to network tool");
        assert_eq!(err.code, "POLICY_VIOLATION");
        assert_eq!(err.source_name.as_deref(), Some("dlp"));
        assert!(err.kind.is_blocking());
        assert!(!ToolError::transport("boom").kind.is_blocking());
    }

    #[test]
    fn test_tool_error_lifts_into_warden_error() {
        let err = ToolError::policy("dlp", "denied").into_warden_error("http_post");
        match err {
            WardenError::PolicyViolation { tool, policy, .. } => {
                assert_eq!(tool, "http_post");
                assert_eq!(policy, "dlp");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_response_serialization() {
        let response = WardenError::WriterClosed.to_error_response();
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("WRITER_CLOSED"));
        assert!(json.contains("\"writer\""));

        let parsed: ErrorResponse = serde_json::from_str(&json).unwrap();
        assert!(!parsed.error.recoverable);
    }
}
