//! Transport contract
//!
//! The transport actually executes a tool. The runtime never lets a
//! transport failure escape raw: [`TransportFailure`]s and panics are
//! classified into a [`ToolError`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{codes, ToolError};
use crate::registry::ToolSpecRef;
use crate::runtime::CallContext;
use crate::taint::TaintSet;

/// Value returned by a transport, with optional usage and extra taint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportOutput {
    pub value: Value,
    pub tokens: Option<u64>,
    pub cost: Option<f64>,
    /// Tags the transport attaches to its output (e.g. file_read)
    pub tags: TaintSet,
}

impl TransportOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_tags(mut self, tags: TaintSet) -> Self {
        self.tags = tags;
        self
    }
}

impl From<Value> for TransportOutput {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailureKind {
    Failed,
    Timeout,
    Cancelled,
    Unavailable,
}

/// Typed failure reported by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub kind: TransportFailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: TransportFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(TransportFailureKind::Failed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportFailureKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(TransportFailureKind::Cancelled, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TransportFailureKind::Unavailable, message)
    }

    /// Map into the call error taxonomy
    pub fn classify(self) -> ToolError {
        match self.kind {
            TransportFailureKind::Failed => ToolError::transport(self.message),
            TransportFailureKind::Timeout => {
                ToolError::transport(self.message).with_code("TRANSPORT_TIMEOUT")
            }
            TransportFailureKind::Unavailable => {
                ToolError::transport(self.message).with_code("TRANSPORT_UNAVAILABLE")
            }
            TransportFailureKind::Cancelled => ToolError::cancelled(self.message),
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportFailure {}

/// Executes tools on behalf of the runtime
pub trait Transport: Send + Sync {
    fn execute(
        &self,
        tool: &ToolSpecRef,
        args: &Value,
        ctx: &CallContext,
    ) -> Result<TransportOutput, TransportFailure>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn execute(
        &self,
        tool: &ToolSpecRef,
        args: &Value,
        ctx: &CallContext,
    ) -> Result<TransportOutput, TransportFailure> {
        (**self).execute(tool, args, ctx)
    }
}

/// Transport backed by a single closure
pub struct FnTransport<F> {
    handler: F,
}

impl<F> FnTransport<F>
where
    F: Fn(&ToolSpecRef, &Value) -> Result<Value, TransportFailure> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> Transport for FnTransport<F>
where
    F: Fn(&ToolSpecRef, &Value) -> Result<Value, TransportFailure> + Send + Sync,
{
    fn execute(
        &self,
        tool: &ToolSpecRef,
        args: &Value,
        _ctx: &CallContext,
    ) -> Result<TransportOutput, TransportFailure> {
        (self.handler)(tool, args).map(TransportOutput::new)
    }
}

type Handler =
    Box<dyn Fn(&Value, &CallContext) -> Result<TransportOutput, TransportFailure> + Send + Sync>;

/// Transport dispatching on tool name
#[derive(Default)]
pub struct HandlerTransport {
    handlers: HashMap<String, Handler>,
}

impl HandlerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler<F>(mut self, tool: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value, &CallContext) -> Result<TransportOutput, TransportFailure>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(tool.into(), Box::new(handler));
        self
    }
}

impl Transport for HandlerTransport {
    fn execute(
        &self,
        tool: &ToolSpecRef,
        args: &Value,
        ctx: &CallContext,
    ) -> Result<TransportOutput, TransportFailure> {
        match self.handlers.get(&tool.name) {
            Some(handler) => handler(args, ctx),
            None => Err(TransportFailure::unavailable(format!(
                "no handler for tool '{}'",
                tool.name
            ))),
        }
    }
}

/// Classify a panic payload caught around a transport call
pub(crate) fn classify_panic(payload: Box<dyn Any + Send>) -> ToolError {
    ToolError::transport(format!("transport panicked: {}", panic_message(payload.as_ref())))
        .with_code(codes::TRANSPORT_ERROR)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use serde_json::json;

    fn spec() -> ToolSpecRef {
        ToolSpecRef::new("echo", "1.0", "sha256:schema")
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            TransportFailure::failed("boom").classify().code,
            "TRANSPORT_ERROR"
        );
        assert_eq!(
            TransportFailure::timeout("slow").classify().code,
            "TRANSPORT_TIMEOUT"
        );
        assert_eq!(
            TransportFailure::cancelled("stop").classify().kind,
            ToolErrorKind::Cancelled
        );
    }

    #[test]
    fn test_fn_transport() {
        let transport = FnTransport::new(|_tool, args| Ok(args.clone()));
        let ctx = CallContext::new("run");
        let out = transport.execute(&spec(), &json!({"x": 1}), &ctx).unwrap();
        assert_eq!(out.value, json!({"x": 1}));
        assert!(out.tokens.is_none());
    }

    #[test]
    fn test_handler_transport_dispatch() {
        let transport = HandlerTransport::new().with_handler("echo", |args, _ctx| {
            Ok(TransportOutput::new(args.clone()).with_tokens(3))
        });
        let ctx = CallContext::new("run");

        let out = transport.execute(&spec(), &json!("hi"), &ctx).unwrap();
        assert_eq!(out.tokens, Some(3));

        let missing = ToolSpecRef::new("other", "1.0", "sha256:schema");
        let err = transport.execute(&missing, &json!(null), &ctx).unwrap_err();
        assert_eq!(err.kind, TransportFailureKind::Unavailable);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("exploded");
        assert_eq!(panic_message(payload.as_ref()), "exploded");
        let err = classify_panic(Box::new(String::from("bad state")));
        assert!(err.message.contains("bad state"));
    }
}
