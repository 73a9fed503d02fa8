//! Async facade over [`ToolRuntime`]
//!
//! Each call runs on tokio's blocking pool so transports and trace writes
//! never stall the executor.

use std::sync::Arc;

use crate::error::{Result, WardenError};
use crate::registry::ToolSpecRef;
use crate::runtime::{CallContext, ToolResult, ToolRuntime};
use crate::taint::TaintedData;

/// Async handle over a shared runtime
#[derive(Clone)]
pub struct AsyncToolRuntime {
    inner: Arc<ToolRuntime>,
}

impl AsyncToolRuntime {
    pub fn new(runtime: ToolRuntime) -> Self {
        Self {
            inner: Arc::new(runtime),
        }
    }

    pub fn from_arc(runtime: Arc<ToolRuntime>) -> Self {
        Self { inner: runtime }
    }

    pub fn inner(&self) -> &Arc<ToolRuntime> {
        &self.inner
    }

    pub async fn invoke(
        &self,
        tool: ToolSpecRef,
        args: TaintedData,
        ctx: CallContext,
    ) -> Result<ToolResult> {
        let runtime = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || runtime.invoke(&tool, args, &ctx))
            .await
            .map_err(|e| WardenError::InternalError {
                reason: format!("Task join error: {}", e),
            })?
    }

    pub async fn close(&self) -> Result<()> {
        let runtime = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || runtime.close())
            .await
            .map_err(|e| WardenError::InternalError {
                reason: format!("Task join error: {}", e),
            })?
    }
}
