//! DLP enforcement middleware

use serde_json::json;

use crate::error::{codes, Result};
use crate::middleware::{Block, Emitter, HookResult, Middleware};
use crate::registry::ToolSpecRef;
use crate::runtime::CallContext;
use crate::taint::{evaluate, DlpAction, DlpDecision, DlpPolicy, TaintedData};

/// Blocks or flags calls based on the taint reaching them
///
/// As a pre-hook it checks the arguments (plus everything the context has
/// accumulated); a `block` decision stops the call. As a post-hook it checks
/// the output; since the call already ran, any decision there is recorded
/// as a `DLP_FLAG` event.
pub struct DlpMiddleware {
    policy: DlpPolicy,
}

impl DlpMiddleware {
    pub fn new(policy: DlpPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &DlpPolicy {
        &self.policy
    }

    fn flag(
        &self,
        emit: &Emitter<'_>,
        tool: &ToolSpecRef,
        phase: &str,
        decision: &DlpDecision,
    ) -> HookResult {
        tracing::warn!(
            tool = %tool,
            rule = %decision.rule,
            phase = phase,
            action = decision.action.as_str(),
            "DLP policy flagged call"
        );
        emit.log(
            codes::DLP_FLAG,
            decision.reason.clone(),
            json!({
                "phase": phase,
                "action": decision.action,
                "rule": decision.rule,
                "offending": decision.offending,
            }),
        )?;
        Ok(())
    }
}

impl Middleware for DlpMiddleware {
    fn name(&self) -> &str {
        "dlp"
    }

    fn can_block(&self) -> bool {
        true
    }

    fn on_call_start(
        &self,
        tool: &ToolSpecRef,
        args: &TaintedData,
        ctx: &CallContext,
        emit: &Emitter<'_>,
    ) -> HookResult<Option<Block>> {
        let tags = ctx.taint().union(&args.tags);
        match evaluate(&tags, &tool.name, &self.policy) {
            Some(decision) if decision.action == DlpAction::Block => Ok(Some(Block::policy(
                format!("dlp:{}", decision.rule),
                decision.reason,
            ))),
            Some(decision) => {
                self.flag(emit, tool, "input", &decision)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn on_call_success(
        &self,
        tool: &ToolSpecRef,
        _args: &TaintedData,
        _ctx: &CallContext,
        result: &TaintedData,
        emit: &Emitter<'_>,
    ) -> HookResult {
        if let Some(decision) = evaluate(&result.tags, &tool.name, &self.policy) {
            self.flag(emit, tool, "output", &decision)?;
        }
        Ok(())
    }
}
