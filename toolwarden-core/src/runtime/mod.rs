//! # Tool Runtime
//!
//! `ToolRuntime::invoke` is the single choke point every tool call goes
//! through. Per call:
//!
//! ```text
//! CREATED ─► validators ─► pre-hooks ─┬─► BLOCKED ───────────────┐
//!                                     │                          ▼
//!                                     └─► EXECUTING ─► SUCCESS | FAILED
//!                                                          │
//!                                                     post-hooks ─► DONE
//! ```
//!
//! - `STEP_START` is written on entering EXECUTING or BLOCKED, with the
//!   call fingerprint and accumulated taint.
//! - `STEP_OK` / `STEP_FAIL` is written once the outcome is known; blocked
//!   calls get `STEP_FAIL` with `outcome: "blocked"`.
//! - Exactly one [`Receipt`] is returned per call attempt. Retries are the
//!   caller's job (see [`CallContext::retry`]).
//!
//! Transport failures and panics are classified into a [`ToolError`] inside
//! the [`ToolResult`]. The only `Err` that escapes `invoke` is a writer
//! failure, which is fatal to the trace and must reach the caller.

mod budget;
mod context;
mod receipt;
pub(crate) mod transport;

#[cfg(feature = "async-runtime")]
mod async_runtime;

pub use budget::{CancellationToken, ResourceBudget};
pub use context::CallContext;
pub use receipt::{Outcome, Receipt, ResourceUsage, ToolResult};
pub use transport::{
    FnTransport, HandlerTransport, Transport, TransportFailure, TransportFailureKind,
    TransportOutput,
};

#[cfg(feature = "async-runtime")]
pub use async_runtime::AsyncToolRuntime;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;

use crate::config::WardenConfig;
use crate::error::{codes, Result, ToolError};
use crate::middleware::{
    ArgumentValidator, Block, DlpMiddleware, Emitter, LoggingMiddleware, Middleware,
    MiddlewareChain, SchemaValidator,
};
use crate::registry::{ToolRegistry, ToolSpecRef};
use crate::taint::{DataSanitizer, TaintEntry, TaintSet, TaintStore, TaintTag, TaintedData};
use crate::trace::{
    canonical_input, summarize, EventSink, EventType, Fingerprint, FingerprintLedger, StartState,
    StepFailPayload, StepOkPayload, StepStartPayload, TraceExporter, TraceWriter,
};

/// Orchestrates tool calls through validation, middleware, transport and
/// trace emission
pub struct ToolRuntime {
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    validators: Vec<Arc<dyn ArgumentValidator>>,
    chain: MiddlewareChain,
    taint_store: Option<Arc<TaintStore>>,
    exporter: Option<Arc<dyn TraceExporter>>,
    export_enabled: bool,
    ledger: FingerprintLedger,
}

impl ToolRuntime {
    pub fn builder(
        registry: Arc<ToolRegistry>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
    ) -> ToolRuntimeBuilder {
        ToolRuntimeBuilder {
            registry,
            transport,
            sink,
            validators: Vec::new(),
            chain: MiddlewareChain::new(),
            taint_store: None,
            exporter: None,
            export_enabled: false,
        }
    }

    /// Resolve a tool by name and invoke it
    pub fn invoke_by_name(
        &self,
        name: &str,
        version: Option<&str>,
        args: TaintedData,
        ctx: &CallContext,
    ) -> Result<ToolResult> {
        let tool = self.registry.resolve(name, version)?;
        self.invoke(&tool, args, ctx)
    }

    /// Run one call attempt through the pipeline
    ///
    /// Once the attempt is finished, records still buffered past the flush
    /// interval are written out, so a run that goes idle leaves no stale
    /// tail in memory.
    pub fn invoke(
        &self,
        tool: &ToolSpecRef,
        args: TaintedData,
        ctx: &CallContext,
    ) -> Result<ToolResult> {
        let result = self.run_attempt(tool, args, ctx)?;
        self.sink.flush_if_due()?;
        Ok(result)
    }

    fn run_attempt(
        &self,
        tool: &ToolSpecRef,
        args: TaintedData,
        ctx: &CallContext,
    ) -> Result<ToolResult> {
        let started = Instant::now();
        ctx.add_taint(&args.tags);

        let canonical = canonical_input(&tool.name, &tool.version, &args.value);
        let fingerprint = Fingerprint::of_canonical(&canonical);
        let collision = self.ledger.observe(&tool.name, &fingerprint, &canonical);

        let exporter = if self.export_enabled {
            self.exporter.as_deref()
        } else {
            None
        };
        let emit = Emitter::new(self.sink.as_ref(), exporter, ctx, tool, fingerprint.as_str());

        tracing::debug!(
            run_id = %ctx.run_id(),
            step_id = %ctx.step_id(),
            tool = %tool,
            fingerprint = %fingerprint,
            "Invoking tool"
        );

        // CREATED -> PRE_HOOKS
        let mut block = self.validate(tool, &args);
        if block.is_none() {
            block = self.chain.run_start(tool, &args, ctx, &emit)?;
        }
        if block.is_none() {
            block = gate(ctx);
        }

        // PRE_HOOKS -> BLOCKED | EXECUTING
        let taint = ctx.taint();
        let start = StepStartPayload {
            version: tool.version.clone(),
            state: if block.is_some() {
                StartState::Blocked
            } else {
                StartState::Executing
            },
            max_sensitivity: taint.max_sensitivity(),
            taint,
        };
        emit.emit(EventType::StepStart, serde_json::to_value(&start)?)?;

        if let Some(err) = collision {
            tracing::warn!(tool = %tool, fingerprint = %fingerprint, "Fingerprint collision");
            emit.log(
                codes::FINGERPRINT_COLLISION,
                err.to_string(),
                json!({ "fingerprint": fingerprint.as_str() }),
            )?;
        }

        if let Some(block) = block {
            let blocked_by = block.policy.clone();
            let error = block.into_tool_error();
            let usage = ResourceUsage {
                duration_ms: elapsed_ms(started),
                ..Default::default()
            };
            return self.fail(tool, &args, ctx, &emit, error, usage, Some(blocked_by));
        }

        // EXECUTING -> SUCCESS | FAILED
        let executed = catch_unwind(AssertUnwindSafe(|| {
            self.transport.execute(tool, &args.value, ctx)
        }));

        let output = match executed {
            Ok(Ok(output)) => output,
            Ok(Err(failure)) => {
                let usage = ResourceUsage {
                    duration_ms: elapsed_ms(started),
                    ..Default::default()
                };
                return self.fail(tool, &args, ctx, &emit, failure.classify(), usage, None);
            }
            Err(panic) => {
                let usage = ResourceUsage {
                    duration_ms: elapsed_ms(started),
                    ..Default::default()
                };
                let error = transport::classify_panic(panic);
                return self.fail(tool, &args, ctx, &emit, error, usage, None);
            }
        };

        let usage = ResourceUsage {
            duration_ms: elapsed_ms(started),
            tokens: output.tokens,
            cost: output.cost,
        };
        if let Some(reason) = ctx.budget().and_then(|b| b.check_usage(&usage)) {
            return self.fail(tool, &args, ctx, &emit, ToolError::budget(reason), usage, None);
        }

        let result = TaintedData::new(output.value, self.output_taint(tool, ctx, &output.tags));
        if let Some(store) = &self.taint_store {
            store.append(TaintEntry::new(
                ctx.run_id(),
                ctx.step_id(),
                tool.name.clone(),
                result.tags.clone(),
            ));
        }

        let ok = StepOkPayload {
            usage,
            output_summary: summarize(&result.value),
            output_taint: result.tags.clone(),
        };
        emit.emit(EventType::StepOk, serde_json::to_value(&ok)?)?;

        // SUCCESS -> POST_HOOKS -> DONE
        self.chain.run_success(tool, &args, ctx, &result, &emit)?;

        tracing::debug!(step_id = %ctx.step_id(), tool = %tool, "Tool call succeeded");
        let receipt = receipt(tool, ctx, &fingerprint, Outcome::Ok, None, usage);
        Ok(ToolResult {
            outcome: Ok(result),
            usage,
            receipt,
        })
    }

    /// Validation stage: registry lookup, schema identity, validators
    fn validate(&self, tool: &ToolSpecRef, args: &TaintedData) -> Option<Block> {
        let spec = match self.registry.spec_for(tool) {
            Some(spec) => spec,
            None => {
                return Some(Block::validation(
                    "registry",
                    format!("tool '{}' is not registered", tool),
                ))
            }
        };

        let expected = spec.schema_fingerprint();
        if expected.as_str() != tool.schema_fingerprint {
            return Some(Block::validation(
                "registry",
                format!(
                    "schema fingerprint mismatch for '{}': expected {}, got {}",
                    tool, expected, tool.schema_fingerprint
                ),
            ));
        }

        self.validators.iter().find_map(|validator| {
            validator
                .validate(spec, &args.value)
                .err()
                .map(|reason| Block::validation(validator.name(), reason))
        })
    }

    /// Accumulated call taint, plus transport tags, plus the tool's own tag
    fn output_taint(&self, tool: &ToolSpecRef, ctx: &CallContext, extra: &TaintSet) -> TaintSet {
        let mut tags = ctx.taint();
        tags.extend(extra);
        if let Some(spec) = self.registry.spec_for(tool) {
            if let Some(sensitivity) = spec.output_sensitivity {
                tags.insert(TaintTag::new(spec.output_source, sensitivity, ctx.step_id()));
            }
        }
        tags
    }

    #[allow(clippy::too_many_arguments)]
    fn fail(
        &self,
        tool: &ToolSpecRef,
        args: &TaintedData,
        ctx: &CallContext,
        emit: &Emitter<'_>,
        error: ToolError,
        usage: ResourceUsage,
        blocked_by: Option<String>,
    ) -> Result<ToolResult> {
        let outcome = if blocked_by.is_some() {
            Outcome::Blocked
        } else {
            Outcome::Fail
        };

        let payload = StepFailPayload {
            outcome: outcome.as_str().to_string(),
            error_code: error.code.clone(),
            error_message: error.message.clone(),
            blocked_by,
            usage,
        };
        emit.emit(EventType::StepFail, serde_json::to_value(&payload)?)?;

        self.chain.run_error(tool, args, ctx, &error, emit)?;

        tracing::debug!(
            step_id = %ctx.step_id(),
            tool = %tool,
            outcome = %outcome,
            code = %error.code,
            "Tool call did not succeed"
        );
        let fingerprint = Fingerprint::from_raw(emit.fingerprint());
        let receipt = receipt(tool, ctx, &fingerprint, outcome, Some(error.code.clone()), usage);
        Ok(ToolResult {
            outcome: Err(error),
            usage,
            receipt,
        })
    }

    /// Sanitizer writing into this runtime's trace
    pub fn sanitizer(&self) -> DataSanitizer {
        DataSanitizer::new(Arc::clone(&self.sink))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn taint_store(&self) -> Option<&Arc<TaintStore>> {
        self.taint_store.as_ref()
    }

    pub fn middleware(&self) -> &MiddlewareChain {
        &self.chain
    }

    /// Flush the trace
    pub fn flush(&self) -> Result<()> {
        self.sink.flush()
    }

    /// Drain and close the trace
    pub fn close(&self) -> Result<()> {
        self.sink.close()
    }
}

/// Cooperative cancellation and deadline checks before execution
fn gate(ctx: &CallContext) -> Option<Block> {
    if ctx.is_cancelled() {
        return Some(Block::cancelled(format!(
            "step '{}' cancelled before execution",
            ctx.step_id()
        )));
    }
    match ctx.budget() {
        Some(budget) if budget.is_expired() => {
            Some(Block::budget("deadline passed before execution"))
        }
        _ => None,
    }
}

fn receipt(
    tool: &ToolSpecRef,
    ctx: &CallContext,
    fingerprint: &Fingerprint,
    outcome: Outcome,
    error_code: Option<String>,
    usage: ResourceUsage,
) -> Receipt {
    Receipt {
        run_id: ctx.run_id().to_string(),
        step_id: ctx.step_id().to_string(),
        attempt: ctx.attempt(),
        tool: tool.name.clone(),
        tool_version: tool.version.clone(),
        fingerprint: fingerprint.to_string(),
        outcome,
        error_code,
        usage,
        completed_at: Utc::now(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Builder for [`ToolRuntime`]
pub struct ToolRuntimeBuilder {
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    validators: Vec<Arc<dyn ArgumentValidator>>,
    chain: MiddlewareChain,
    taint_store: Option<Arc<TaintStore>>,
    exporter: Option<Arc<dyn TraceExporter>>,
    export_enabled: bool,
}

impl ToolRuntimeBuilder {
    /// Builder preloaded from configuration
    ///
    /// Opens the configured trace writer and installs the schema validator,
    /// logging middleware, DLP middleware and a taint store.
    pub fn from_config(
        config: &WardenConfig,
        registry: Arc<ToolRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let dlp = DlpMiddleware::new(config.dlp.clone())?;
        let writer = TraceWriter::open(&config.writer)?;

        Ok(ToolRuntime::builder(registry, transport, Arc::new(writer))
            .validator(Arc::new(SchemaValidator::new()))
            .middleware(Arc::new(LoggingMiddleware::new()))
            .middleware(Arc::new(dlp))
            .taint_store(Arc::new(TaintStore::new()))
            .export_enabled(config.export_enabled))
    }

    /// Append a validator; validators run in insertion order
    pub fn validator(mut self, validator: Arc<dyn ArgumentValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Append a middleware; hooks run in insertion order
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.chain.push(middleware);
        self
    }

    pub fn taint_store(mut self, store: Arc<TaintStore>) -> Self {
        self.taint_store = Some(store);
        self
    }

    /// Install an exporter; it only receives events while export is enabled
    pub fn exporter(mut self, exporter: Arc<dyn TraceExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn export_enabled(mut self, enabled: bool) -> Self {
        self.export_enabled = enabled;
        self
    }

    pub fn build(self) -> ToolRuntime {
        if self.export_enabled && self.exporter.is_none() {
            tracing::debug!("Export enabled without an exporter; events stay local");
        }
        ToolRuntime {
            registry: self.registry,
            transport: self.transport,
            sink: self.sink,
            validators: self.validators,
            chain: self.chain,
            taint_store: self.taint_store,
            exporter: self.exporter,
            export_enabled: self.export_enabled,
            ledger: FingerprintLedger::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use crate::registry::ToolSpec;
    use crate::taint::{Sensitivity, TaintSource};
    use crate::trace::MemorySink;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    impl Transport for Counting {
        fn execute(
            &self,
            _tool: &ToolSpecRef,
            args: &Value,
            _ctx: &CallContext,
        ) -> std::result::Result<TransportOutput, TransportFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match args.get("fail").and_then(Value::as_str) {
                Some("panic") => panic!("transport exploded"),
                Some(message) => Err(TransportFailure::failed(message)),
                None => Ok(TransportOutput::new(json!({"echo": args})).with_tokens(10)),
            }
        }
    }

    fn runtime(
        sink: Arc<MemorySink>,
        transport: Arc<Counting>,
    ) -> (ToolRuntime, ToolSpecRef) {
        let mut registry = ToolRegistry::new();
        let tool = registry
            .register(ToolSpec::new("echo", "1.0").with_output_taint(
                TaintSource::ToolOutput,
                Sensitivity::Internal,
            ))
            .unwrap();
        let runtime = ToolRuntime::builder(Arc::new(registry), transport, sink).build();
        (runtime, tool)
    }

    fn counting() -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_success_emits_start_and_ok() {
        let sink = Arc::new(MemorySink::new());
        let (runtime, tool) = runtime(sink.clone(), counting());
        let ctx = CallContext::new("run").with_step_id("s1");

        let result = runtime
            .invoke(&tool, TaintedData::untainted(json!({"x": 1})), &ctx)
            .unwrap();

        assert!(result.is_ok());
        assert_eq!(result.usage.tokens, Some(10));
        assert_eq!(result.receipt.outcome, Outcome::Ok);
        assert_eq!(result.value().unwrap().max_sensitivity(), Some(Sensitivity::Internal));

        let events = sink.events();
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::StepStart, EventType::StepOk]);
        assert_eq!(events[0].fingerprint.as_deref(), Some(result.fingerprint()));
        assert_eq!(events[0].payload["state"], "executing");
    }

    #[test]
    fn test_transport_failure_is_classified() {
        let sink = Arc::new(MemorySink::new());
        let (runtime, tool) = runtime(sink.clone(), counting());
        let ctx = CallContext::new("run");

        let result = runtime
            .invoke(&tool, TaintedData::untainted(json!({"fail": "disk gone"})), &ctx)
            .unwrap();

        let error = result.error().unwrap();
        assert_eq!(error.kind, ToolErrorKind::Transport);
        assert_eq!(result.receipt.outcome, Outcome::Fail);
        assert_eq!(sink.events()[1].payload["outcome"], "fail");
    }

    #[test]
    fn test_transport_panic_is_classified() {
        let sink = Arc::new(MemorySink::new());
        let (runtime, tool) = runtime(sink.clone(), counting());
        let ctx = CallContext::new("run");

        let result = runtime
            .invoke(&tool, TaintedData::untainted(json!({"fail": "panic"})), &ctx)
            .unwrap();
        assert!(result.error().unwrap().message.contains("transport exploded"));
        assert_eq!(sink.events().len(), 2);
    }

    #[test]
    fn test_unknown_tool_is_blocked() {
        let sink = Arc::new(MemorySink::new());
        let transport = counting();
        let (runtime, _) = runtime(sink.clone(), transport.clone());
        let ctx = CallContext::new("run");
        let ghost = ToolSpecRef::new("ghost", "1.0", "sha256:none");

        let result = runtime
            .invoke(&ghost, TaintedData::untainted(json!({})), &ctx)
            .unwrap();

        assert!(result.is_blocked());
        assert_eq!(result.error().unwrap().code, "VALIDATION_ERROR");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.events()[0].payload["state"], "blocked");
    }

    #[test]
    fn test_cancelled_before_execution() {
        let sink = Arc::new(MemorySink::new());
        let transport = counting();
        let (runtime, tool) = runtime(sink.clone(), transport.clone());
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::new("run").with_cancellation(token);

        let result = runtime
            .invoke(&tool, TaintedData::untainted(json!({})), &ctx)
            .unwrap();
        assert_eq!(result.error().unwrap().kind, ToolErrorKind::Cancelled);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_token_budget_exceeded_after_execution() {
        let sink = Arc::new(MemorySink::new());
        let (runtime, tool) = runtime(sink.clone(), counting());
        let ctx = CallContext::new("run").with_budget(ResourceBudget::new().with_max_tokens(5));

        let result = runtime
            .invoke(&tool, TaintedData::untainted(json!({})), &ctx)
            .unwrap();
        assert_eq!(result.error().unwrap().code, "BUDGET_EXCEEDED");
        assert_eq!(result.receipt.outcome, Outcome::Fail);
        assert_eq!(result.usage.tokens, Some(10));
    }

    #[test]
    fn test_writer_failure_propagates() {
        let sink = Arc::new(MemorySink::new());
        sink.close().unwrap();
        let (runtime, tool) = runtime(sink, counting());
        let ctx = CallContext::new("run");

        let err = runtime
            .invoke(&tool, TaintedData::untainted(json!({})), &ctx)
            .unwrap_err();
        assert!(err.is_writer_fatal());
    }

    #[test]
    fn test_output_inherits_argument_taint() {
        let sink = Arc::new(MemorySink::new());
        let store = Arc::new(TaintStore::new());
        let mut registry = ToolRegistry::new();
        let tool = registry.register(ToolSpec::new("echo", "1.0")).unwrap();
        let runtime = ToolRuntime::builder(Arc::new(registry), counting(), sink)
            .taint_store(store.clone())
            .build();

        let secret = TaintTag::new(TaintSource::Environment, Sensitivity::Secret, "s0");
        let args = TaintedData::untainted(json!({"k": "v"})).with_tag(secret.clone());
        let ctx = CallContext::new("run").with_step_id("s1");
        let result = runtime.invoke(&tool, args, &ctx).unwrap();

        assert!(result.value().unwrap().tags.contains(&secret));
        assert!(store.tags_for_run("run").contains(&secret));
    }
}
