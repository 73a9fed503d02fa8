//! # Toolwarden Core
//!
//! Toolwarden sits between an agent and the tools it calls:
//!
//! - **Runtime**: every tool call goes through [`ToolRuntime::invoke`], which
//!   validates arguments, runs middleware, executes the transport and returns
//!   a typed [`ToolResult`] with a [`Receipt`]
//! - **Trace**: each call is written to an append-only JSONL trace as
//!   `STEP_START` plus exactly one terminal `STEP_OK` / `STEP_FAIL`, keyed by
//!   a deterministic argument fingerprint
//! - **Taint**: values carry provenance tags that propagate from inputs to
//!   outputs and drive DLP decisions; removing a tag needs an explicit,
//!   logged declassification
//!
//! ## Core Principle
//!
//! > If it is not in the trace, the call did not happen.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use toolwarden_core::{
//!     CallContext, HandlerTransport, MemorySink, TaintedData, ToolRegistry, ToolRuntime,
//!     ToolSpec, TransportOutput,
//! };
//!
//! let mut registry = ToolRegistry::new();
//! let add = registry.register(ToolSpec::new("add", "1.0")).unwrap();
//!
//! let transport = HandlerTransport::new().with_handler("add", |args, _ctx| {
//!     let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
//!     Ok(TransportOutput::new(json!(sum)))
//! });
//!
//! let sink = Arc::new(MemorySink::new());
//! let runtime = ToolRuntime::builder(Arc::new(registry), Arc::new(transport), sink.clone())
//!     .build();
//!
//! let ctx = CallContext::new("run-1");
//! let result = runtime
//!     .invoke(&add, TaintedData::untainted(json!({"a": 2, "b": 3})), &ctx)
//!     .unwrap();
//!
//! assert_eq!(result.value().unwrap().value, json!(5));
//! assert_eq!(sink.event_count(), 2);
//! ```

pub mod config;
pub mod error;
pub mod middleware;
pub mod registry;
pub mod runtime;
pub mod taint;
pub mod trace;

// Re-export main types
pub use config::{WardenConfig, WriterConfig, WriterConfigBuilder, WriterMode};
pub use error::{
    ErrorCategory, ErrorDetail, ErrorResponse, Result, ToolError, ToolErrorKind, WardenError,
};
pub use middleware::{
    ArgumentValidator, Block, DlpMiddleware, Emitter, HookError, HookResult, LoggingMiddleware,
    Middleware, MiddlewareChain, SchemaValidator,
};
pub use registry::{ToolRegistry, ToolSpec, ToolSpecRef};
pub use runtime::{
    CallContext, CancellationToken, FnTransport, HandlerTransport, Outcome, Receipt,
    ResourceBudget, ResourceUsage, ToolResult, ToolRuntime, ToolRuntimeBuilder, Transport,
    TransportFailure, TransportFailureKind, TransportOutput,
};
pub use taint::{
    DataSanitizer, DlpAction, DlpDecision, DlpPolicy, DlpRule, Justification, Sensitivity,
    TaintDetector, TaintSet, TaintSource, TaintStore, TaintTag, TaintedData, TagSelector,
};
pub use trace::{
    AsyncTraceWriter, EventSink, EventType, Fingerprint, MemorySink, NullSink, SyncTraceWriter,
    ToolEvent, TraceExporter, TraceLoader, TraceRecord, TraceWriter,
};

#[cfg(feature = "async-runtime")]
pub use runtime::AsyncToolRuntime;

/// Version of the trace record schema
pub const TRACE_SCHEMA_VERSION: &str = trace::SCHEMA_VERSION;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
