//! Pass-through exporter hook
//!
//! When exporting is enabled, every event the writer accepted is handed to
//! a [`TraceExporter`]. Exporter failures are logged and never affect the
//! call or the trace file.

use parking_lot::Mutex;

use crate::trace::ToolEvent;

pub trait TraceExporter: Send + Sync {
    fn name(&self) -> &str;

    fn export(&self, event: &ToolEvent) -> Result<(), String>;
}

/// Forward an event, logging instead of failing
pub(crate) fn forward(exporter: &dyn TraceExporter, event: &ToolEvent) {
    if let Err(reason) = exporter.export(event) {
        tracing::warn!(
            exporter = exporter.name(),
            event_type = %event.event_type,
            step_id = %event.step_id,
            reason = %reason,
            "Trace exporter failed"
        );
    }
}

/// Exporter that keeps events in memory
#[derive(Default)]
pub struct CollectingExporter {
    events: Mutex<Vec<ToolEvent>>,
}

impl CollectingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ToolEvent> {
        self.events.lock().clone()
    }
}

impl TraceExporter for CollectingExporter {
    fn name(&self) -> &str {
        "collecting"
    }

    fn export(&self, event: &ToolEvent) -> Result<(), String> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::EventType;
    use serde_json::json;

    struct FailingExporter;

    impl TraceExporter for FailingExporter {
        fn name(&self) -> &str {
            "failing"
        }

        fn export(&self, _event: &ToolEvent) -> Result<(), String> {
            Err("collector unreachable".to_string())
        }
    }

    #[test]
    fn test_forward_swallows_failures() {
        let event = ToolEvent::new("r", "t", "s", "tool", EventType::Log, json!({}));
        forward(&FailingExporter, &event);

        let collecting = CollectingExporter::new();
        forward(&collecting, &event);
        assert_eq!(collecting.events().len(), 1);
    }
}
