//! Logging middleware
//!
//! Mirrors every call into `tracing`. Observation only: it never blocks
//! and never writes to the trace.

use crate::error::ToolError;
use crate::middleware::{Block, Emitter, HookResult, Middleware};
use crate::registry::ToolSpecRef;
use crate::runtime::CallContext;
use crate::taint::TaintedData;

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_call_start(
        &self,
        tool: &ToolSpecRef,
        args: &TaintedData,
        ctx: &CallContext,
        emit: &Emitter<'_>,
    ) -> HookResult<Option<Block>> {
        tracing::info!(
            run_id = %ctx.run_id(),
            step_id = %ctx.step_id(),
            attempt = ctx.attempt(),
            tool = %tool,
            fingerprint = %emit.fingerprint(),
            arg_tags = args.tags.len(),
            "Tool call started"
        );
        Ok(None)
    }

    fn on_call_success(
        &self,
        tool: &ToolSpecRef,
        _args: &TaintedData,
        ctx: &CallContext,
        result: &TaintedData,
        _emit: &Emitter<'_>,
    ) -> HookResult {
        tracing::info!(
            run_id = %ctx.run_id(),
            step_id = %ctx.step_id(),
            tool = %tool,
            output_tags = result.tags.len(),
            max_sensitivity = ?result.max_sensitivity(),
            "Tool call succeeded"
        );
        Ok(())
    }

    fn on_call_error(
        &self,
        tool: &ToolSpecRef,
        _args: &TaintedData,
        ctx: &CallContext,
        error: &ToolError,
        _emit: &Emitter<'_>,
    ) -> HookResult {
        tracing::warn!(
            run_id = %ctx.run_id(),
            step_id = %ctx.step_id(),
            tool = %tool,
            code = %error.code,
            message = %error.message,
            "Tool call failed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::MemorySink;
    use serde_json::json;

    #[test]
    fn test_logging_never_blocks_or_writes() {
        let sink = MemorySink::new();
        let ctx = CallContext::new("run");
        let tool = ToolSpecRef::new("tool", "1.0", "sha256:s");
        let emit = Emitter::new(&sink, None, &ctx, &tool, "sha256:fp");
        let args = TaintedData::untainted(json!({}));
        let logging = LoggingMiddleware::new();

        assert!(!logging.can_block());
        assert!(logging.on_call_start(&tool, &args, &ctx, &emit).unwrap().is_none());
        logging
            .on_call_error(&tool, &args, &ctx, &ToolError::transport("boom"), &emit)
            .unwrap();
        assert!(sink.records().is_empty());
    }
}
