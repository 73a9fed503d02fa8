//! Explicit, audited declassification
//!
//! Tags are append-only everywhere else. The sanitizer is the only way to
//! remove one, and it records who removed what and why in the trace before
//! handing back the reduced value. If the justification cannot be written,
//! the value keeps its tags.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{codes, Result, WardenError};
use crate::runtime::CallContext;
use crate::taint::{Sensitivity, TaintSource, TaintTag, TaintedData};
use crate::trace::{EventSink, EventType, LogPayload};

/// Who declassified and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Justification {
    pub actor: String,
    pub reason: String,
}

impl Justification {
    pub fn new(actor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            reason: reason.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.actor.trim().is_empty() {
            return Err(WardenError::InvalidDeclassification {
                reason: "actor must not be empty".to_string(),
            });
        }
        if self.reason.trim().is_empty() {
            return Err(WardenError::InvalidDeclassification {
                reason: "reason must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Which tags to remove
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum TagSelector {
    Exact(TaintTag),
    Source(TaintSource),
    Origin(String),
    AtOrAbove(Sensitivity),
}

impl TagSelector {
    pub fn matches(&self, tag: &TaintTag) -> bool {
        match self {
            TagSelector::Exact(exact) => tag == exact,
            TagSelector::Source(source) => tag.source == *source,
            TagSelector::Origin(step) => tag.origin_step == *step,
            TagSelector::AtOrAbove(level) => tag.sensitivity >= *level,
        }
    }
}

pub struct DataSanitizer {
    sink: Arc<dyn EventSink>,
}

impl DataSanitizer {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Remove the selected tags from `data`, recording a `DECLASSIFIED` log
    /// event in the call's trace
    pub fn declassify(
        &self,
        ctx: &CallContext,
        tool: &str,
        data: TaintedData,
        selector: &TagSelector,
        justification: &Justification,
    ) -> Result<TaintedData> {
        justification.validate()?;

        let (value, mut tags) = data.into_parts();
        let removed = tags.remove_matching(|tag| selector.matches(tag));

        let payload = LogPayload {
            code: codes::DECLASSIFIED.to_string(),
            message: format!("{} tag(s) declassified by {}", removed.len(), justification.actor),
            data: json!({
                "actor": justification.actor,
                "reason": justification.reason,
                "selector": selector,
                "removed": removed,
            }),
        };
        let event = ctx.event(tool, EventType::Log, serde_json::to_value(&payload)?);
        self.sink.record(event.into())?;

        tracing::info!(
            run_id = %ctx.run_id(),
            step_id = %ctx.step_id(),
            actor = %justification.actor,
            removed = removed.len(),
            "Declassified tainted data"
        );

        Ok(TaintedData::new(value, tags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taint::TaintSet;
    use crate::trace::MemorySink;

    fn data() -> TaintedData {
        let tags: TaintSet = vec![
            TaintTag::new(TaintSource::FileRead, Sensitivity::Secret, "s1"),
            TaintTag::new(TaintSource::UserInput, Sensitivity::Internal, "s2"),
        ]
        .into_iter()
        .collect();
        TaintedData::new(json!("payload"), tags)
    }

    #[test]
    fn test_declassify_removes_and_records() {
        let sink = Arc::new(MemorySink::new());
        let sanitizer = DataSanitizer::new(sink.clone());
        let ctx = CallContext::new("run-1");

        let reduced = sanitizer
            .declassify(
                &ctx,
                "summarize",
                data(),
                &TagSelector::Source(TaintSource::FileRead),
                &Justification::new("reviewer", "content was redacted upstream"),
            )
            .unwrap();

        assert_eq!(reduced.tags.len(), 1);
        assert_eq!(reduced.max_sensitivity(), Some(Sensitivity::Internal));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Log);
        assert_eq!(events[0].payload["code"], "DECLASSIFIED");
        assert_eq!(events[0].payload["data"]["actor"], "reviewer");
        assert_eq!(events[0].payload["data"]["removed"][0]["origin_step"], "s1");
    }

    #[test]
    fn test_declassify_requires_justification() {
        let sink = Arc::new(MemorySink::new());
        let sanitizer = DataSanitizer::new(sink.clone());
        let ctx = CallContext::new("run-1");

        let err = sanitizer
            .declassify(
                &ctx,
                "summarize",
                data(),
                &TagSelector::AtOrAbove(Sensitivity::Public),
                &Justification::new("reviewer", "  "),
            )
            .unwrap_err();
        assert!(matches!(err, WardenError::InvalidDeclassification { .. }));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_closed_sink_keeps_tags() {
        let sink = Arc::new(MemorySink::new());
        sink.close().unwrap();
        let sanitizer = DataSanitizer::new(sink);
        let ctx = CallContext::new("run-1");

        let result = sanitizer.declassify(
            &ctx,
            "summarize",
            data(),
            &TagSelector::Origin("s1".to_string()),
            &Justification::new("reviewer", "approved"),
        );
        assert!(matches!(result, Err(WardenError::WriterClosed)));
    }
}
