//! Middleware chain
//!
//! Middleware observes (and, for policy middleware, gates) every call. The
//! chain is an ordered list fixed when the runtime is built:
//!
//! - `on_call_start` runs before the transport. Middleware that declares
//!   [`Middleware::can_block`] may return a [`Block`]; the first block wins
//!   and later hooks are skipped. A block returned by an observer is
//!   ignored and reported.
//! - `on_call_success` / `on_call_error` run after the outcome is known.
//!
//! A hook that returns an error or panics never changes the call's outcome.
//! The chain catches it and writes an `error` event with code
//! `MIDDLEWARE_FAILURE`, the hook name, and the original error type.

mod dlp;
mod logging;
mod validator;

pub use dlp::DlpMiddleware;
pub use logging::LoggingMiddleware;
pub use validator::{ArgumentValidator, SchemaValidator};

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use crate::error::{codes, Result, ToolError, ToolErrorKind, WardenError};
use crate::registry::ToolSpecRef;
use crate::runtime::transport::panic_message;
use crate::runtime::CallContext;
use crate::taint::TaintedData;
use crate::trace::{
    forward_to_exporter, ErrorPayload, EventSink, EventType, LogPayload, ToolEvent, TraceExporter,
};

/// Error returned by a middleware hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookError {
    /// Type of the failure, recorded in the trace
    pub error_type: String,
    pub message: String,
}

impl HookError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for HookError {}

impl From<WardenError> for HookError {
    fn from(err: WardenError) -> Self {
        HookError::new(err.error_code(), err.to_string())
    }
}

pub type HookResult<T = ()> = std::result::Result<T, HookError>;

/// Decision that stops a call before the transport runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: ToolErrorKind,
    /// Policy or validator that blocked
    pub policy: String,
    pub reason: String,
}

impl Block {
    pub fn policy(policy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::PolicyViolation,
            policy: policy.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(validator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Validation,
            policy: validator.into(),
            reason: reason.into(),
        }
    }

    pub fn budget(reason: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::BudgetExceeded,
            policy: "budget".to_string(),
            reason: reason.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Cancelled,
            policy: "cancellation".to_string(),
            reason: reason.into(),
        }
    }

    pub fn into_tool_error(self) -> ToolError {
        ToolError::new(self.kind, self.reason).with_source(self.policy)
    }
}

/// Handle through which hooks (and the runtime) write trace events for the
/// current call
pub struct Emitter<'a> {
    sink: &'a dyn EventSink,
    exporter: Option<&'a dyn TraceExporter>,
    ctx: &'a CallContext,
    tool: &'a ToolSpecRef,
    fingerprint: &'a str,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(
        sink: &'a dyn EventSink,
        exporter: Option<&'a dyn TraceExporter>,
        ctx: &'a CallContext,
        tool: &'a ToolSpecRef,
        fingerprint: &'a str,
    ) -> Self {
        Self {
            sink,
            exporter,
            ctx,
            tool,
            fingerprint,
        }
    }

    /// Write an event stamped with the call's identity
    pub fn emit(&self, event_type: EventType, payload: Value) -> Result<()> {
        let mut event = self.ctx.event(&self.tool.name, event_type, payload);
        if matches!(
            event_type,
            EventType::StepStart | EventType::StepOk | EventType::StepFail
        ) {
            event = event.with_fingerprint(self.fingerprint);
        }
        self.write(event)
    }

    /// Write a `log` event
    pub fn log(&self, code: &str, message: impl Into<String>, data: Value) -> Result<()> {
        let payload = LogPayload {
            code: code.to_string(),
            message: message.into(),
            data,
        };
        self.emit(EventType::Log, serde_json::to_value(payload)?)
    }

    pub(crate) fn hook_failure(
        &self,
        hook: &str,
        phase: &str,
        error_type: &str,
        message: &str,
    ) -> Result<()> {
        let payload = ErrorPayload {
            code: codes::MIDDLEWARE_FAILURE.to_string(),
            hook: hook.to_string(),
            phase: phase.to_string(),
            error_type: error_type.to_string(),
            message: message.to_string(),
        };
        self.emit(EventType::Error, serde_json::to_value(payload)?)
    }

    fn write(&self, event: ToolEvent) -> Result<()> {
        match self.exporter {
            Some(exporter) => {
                self.sink.record(event.clone().into())?;
                forward_to_exporter(exporter, &event);
            }
            None => self.sink.record(event.into())?,
        }
        Ok(())
    }

    pub fn context(&self) -> &CallContext {
        self.ctx
    }

    pub fn tool(&self) -> &ToolSpecRef {
        self.tool
    }

    pub fn fingerprint(&self) -> &str {
        self.fingerprint
    }
}

/// Observer or gatekeeper invoked around each call
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Whether blocks returned from `on_call_start` are honored
    fn can_block(&self) -> bool {
        false
    }

    fn on_call_start(
        &self,
        _tool: &ToolSpecRef,
        _args: &TaintedData,
        _ctx: &CallContext,
        _emit: &Emitter<'_>,
    ) -> HookResult<Option<Block>> {
        Ok(None)
    }

    fn on_call_success(
        &self,
        _tool: &ToolSpecRef,
        _args: &TaintedData,
        _ctx: &CallContext,
        _result: &TaintedData,
        _emit: &Emitter<'_>,
    ) -> HookResult {
        Ok(())
    }

    fn on_call_error(
        &self,
        _tool: &ToolSpecRef,
        _args: &TaintedData,
        _ctx: &CallContext,
        _error: &ToolError,
        _emit: &Emitter<'_>,
    ) -> HookResult {
        Ok(())
    }
}

const ON_CALL_START: &str = "on_call_start";
const ON_CALL_SUCCESS: &str = "on_call_success";
const ON_CALL_ERROR: &str = "on_call_error";

/// Ordered middleware list
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub fn names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Run pre-hooks in order; returns the first honored block
    ///
    /// Only writer failures are returned as errors.
    pub(crate) fn run_start(
        &self,
        tool: &ToolSpecRef,
        args: &TaintedData,
        ctx: &CallContext,
        emit: &Emitter<'_>,
    ) -> Result<Option<Block>> {
        for m in &self.middleware {
            let outcome = catch_unwind(AssertUnwindSafe(|| m.on_call_start(tool, args, ctx, emit)));
            match outcome {
                Ok(Ok(None)) => {}
                Ok(Ok(Some(block))) if m.can_block() => {
                    tracing::debug!(
                        middleware = m.name(),
                        tool = %tool,
                        reason = %block.reason,
                        "Call blocked by middleware"
                    );
                    return Ok(Some(block));
                }
                Ok(Ok(Some(block))) => {
                    let message = format!("observer attempted to block: {}", block.reason);
                    report(emit, m.name(), ON_CALL_START, "ObserverBlock", &message)?;
                }
                Ok(Err(err)) => {
                    report(emit, m.name(), ON_CALL_START, &err.error_type, &err.message)?
                }
                Err(panic) => report(
                    emit,
                    m.name(),
                    ON_CALL_START,
                    "panic",
                    &panic_message(panic.as_ref()),
                )?,
            }
        }
        Ok(None)
    }

    pub(crate) fn run_success(
        &self,
        tool: &ToolSpecRef,
        args: &TaintedData,
        ctx: &CallContext,
        result: &TaintedData,
        emit: &Emitter<'_>,
    ) -> Result<()> {
        for m in &self.middleware {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                m.on_call_success(tool, args, ctx, result, emit)
            }));
            isolate(emit, m.name(), ON_CALL_SUCCESS, outcome)?;
        }
        Ok(())
    }

    pub(crate) fn run_error(
        &self,
        tool: &ToolSpecRef,
        args: &TaintedData,
        ctx: &CallContext,
        error: &ToolError,
        emit: &Emitter<'_>,
    ) -> Result<()> {
        for m in &self.middleware {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                m.on_call_error(tool, args, ctx, error, emit)
            }));
            isolate(emit, m.name(), ON_CALL_ERROR, outcome)?;
        }
        Ok(())
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("middleware", &self.names())
            .finish()
    }
}

type HookOutcome = std::thread::Result<HookResult>;

fn isolate(emit: &Emitter<'_>, hook: &str, phase: &str, outcome: HookOutcome) -> Result<()> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => report(emit, hook, phase, &err.error_type, &err.message),
        Err(panic) => report(emit, hook, phase, "panic", &panic_message(panic.as_ref())),
    }
}

fn report(
    emit: &Emitter<'_>,
    hook: &str,
    phase: &str,
    error_type: &str,
    message: &str,
) -> Result<()> {
    tracing::warn!(
        middleware = hook,
        phase = phase,
        error_type = error_type,
        message = message,
        "Middleware hook failed; call continues"
    );
    emit.hook_failure(hook, phase, error_type, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::MemorySink;
    use serde_json::json;

    struct Failing;

    impl Middleware for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_call_start(
            &self,
            _tool: &ToolSpecRef,
            _args: &TaintedData,
            _ctx: &CallContext,
            _emit: &Emitter<'_>,
        ) -> HookResult<Option<Block>> {
            Err(HookError::new("IoError", "metrics backend down"))
        }

        fn on_call_success(
            &self,
            _tool: &ToolSpecRef,
            _args: &TaintedData,
            _ctx: &CallContext,
            _result: &TaintedData,
            _emit: &Emitter<'_>,
        ) -> HookResult {
            panic!("observer bug");
        }
    }

    struct Observer;

    impl Middleware for Observer {
        fn name(&self) -> &str {
            "observer"
        }

        fn on_call_start(
            &self,
            _tool: &ToolSpecRef,
            _args: &TaintedData,
            _ctx: &CallContext,
            _emit: &Emitter<'_>,
        ) -> HookResult<Option<Block>> {
            Ok(Some(Block::policy("observer", "should not count")))
        }
    }

    struct Gate;

    impl Middleware for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        fn can_block(&self) -> bool {
            true
        }

        fn on_call_start(
            &self,
            _tool: &ToolSpecRef,
            _args: &TaintedData,
            _ctx: &CallContext,
            _emit: &Emitter<'_>,
        ) -> HookResult<Option<Block>> {
            Ok(Some(Block::policy("gate", "denied")))
        }
    }

    fn fixture() -> (MemorySink, CallContext, ToolSpecRef) {
        (
            MemorySink::new(),
            CallContext::new("run").with_step_id("s1"),
            ToolSpecRef::new("tool", "1.0", "sha256:schema"),
        )
    }

    #[test]
    fn test_hook_errors_become_events() {
        let (sink, ctx, tool) = fixture();
        let emit = Emitter::new(&sink, None, &ctx, &tool, "sha256:fp");
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(Failing));

        let args = TaintedData::untainted(json!({}));
        assert!(chain.run_start(&tool, &args, &ctx, &emit).unwrap().is_none());
        chain
            .run_success(&tool, &args, &ctx, &args, &emit)
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.event_type == EventType::Error));
        assert_eq!(events[0].payload["error_type"], "IoError");
        assert_eq!(events[0].payload["hook"], "failing");
        assert_eq!(events[1].payload["error_type"], "panic");
        assert_eq!(events[1].payload["message"], "observer bug");
        assert_eq!(events[1].payload["phase"], "on_call_success");
    }

    #[test]
    fn test_first_block_wins_and_observers_cannot_block() {
        let (sink, ctx, tool) = fixture();
        let emit = Emitter::new(&sink, None, &ctx, &tool, "sha256:fp");
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(Observer));
        chain.push(Arc::new(Gate));
        chain.push(Arc::new(Failing));

        let args = TaintedData::untainted(json!({}));
        let block = chain.run_start(&tool, &args, &ctx, &emit).unwrap().unwrap();
        assert_eq!(block.policy, "gate");

        // Observer block reported, Failing never reached
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["error_type"], "ObserverBlock");
    }

    #[test]
    fn test_emitter_stamps_fingerprint_on_step_events() {
        let (sink, ctx, tool) = fixture();
        let emit = Emitter::new(&sink, None, &ctx, &tool, "sha256:fp");

        emit.emit(EventType::StepStart, json!({})).unwrap();
        emit.log("NOTE", "hello", Value::Null).unwrap();

        let events = sink.events();
        assert_eq!(events[0].fingerprint.as_deref(), Some("sha256:fp"));
        assert!(events[1].fingerprint.is_none());
        assert_eq!(events[1].payload["code"], "NOTE");
        assert!(events[1].payload.get("data").is_none());
    }

    #[test]
    fn test_block_into_tool_error() {
        let err = Block::validation("schema", "missing path").into_tool_error();
        assert_eq!(err.code, "VALIDATION_ERROR");
        assert_eq!(err.source_name.as_deref(), Some("schema"));
    }
}
