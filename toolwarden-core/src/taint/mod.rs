//! Taint tracking and data-loss prevention
//!
//! Data is labelled with [`TaintTag`]s that record its source, sensitivity
//! and originating step. Tags propagate by union: a tool's output inherits
//! every tag of its inputs. Only [`DataSanitizer`] can remove a tag, and it
//! always records a justification in the trace.
//!
//! ```rust
//! use serde_json::json;
//! use toolwarden_core::taint::{
//!     evaluate, DlpAction, DlpPolicy, Sensitivity, TaintSource, TaintTag, TaintedData,
//! };
//!
//! let secret = TaintedData::untainted(json!("AKIA..."))
//!     .with_tag(TaintTag::new(TaintSource::Environment, Sensitivity::Secret, "step-1"));
//! let combined = TaintedData::derive(json!({"key": "AKIA..."}), [&secret]);
//!
//! let decision = evaluate(&combined.tags, "http_post", &DlpPolicy::default()).unwrap();
//! assert_eq!(decision.action, DlpAction::Block);
//! ```

mod data;
mod detector;
mod policy;
mod sanitizer;
mod store;
mod tag;

pub use data::TaintedData;
pub use detector::{Detection, DetectionRule, TaintDetector};
pub use policy::{evaluate, DlpAction, DlpDecision, DlpPolicy, DlpRule};
pub use sanitizer::{DataSanitizer, Justification, TagSelector};
pub use store::{TaintEntry, TaintStore};
pub use tag::{Sensitivity, TaintSet, TaintSource, TaintTag};
