//! Trace event model, writers and loader
//!
//! A trace file is newline-delimited JSON:
//!
//! ```text
//! {"type":"trace_header","schema_version":"1.0","created_at":"..."}
//! {"event_id":"...","run_id":"...","step_id":"...","type":"STEP_START",...}
//! {"event_id":"...","run_id":"...","step_id":"...","type":"STEP_OK",...}
//! ```
//!
//! Events are appended by a [`TraceWriter`] (sync or async) and indexed
//! offline by [`TraceLoader`].

mod async_writer;
mod event;
mod export;
mod fingerprint;
mod loader;
mod record;
pub(crate) mod sink;
mod sync_writer;
mod writer;

pub use async_writer::AsyncTraceWriter;
pub use event::{
    summarize, ErrorPayload, EventType, LogPayload, StartState, StepFailPayload, StepOkPayload,
    StepStartPayload, ToolEvent, SUMMARY_LIMIT,
};
pub(crate) use export::forward as forward_to_exporter;
pub use export::{CollectingExporter, TraceExporter};
pub use fingerprint::{
    canonical_input, canonical_json, Fingerprint, FingerprintLedger, DEFAULT_LEDGER_CAPACITY,
    FINGERPRINT_PREFIX,
};
pub use loader::{LoaderStats, StepAggregate, TraceLoader};
pub use record::{TraceHeader, TraceRecord, HEADER_TYPE, SCHEMA_VERSION};
pub use sync_writer::SyncTraceWriter;
pub use writer::{EventSink, MemorySink, NullSink, TraceWriter, WriterStats};
