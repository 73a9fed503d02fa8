//! Values carrying their taint

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::taint::{Sensitivity, TaintSet, TaintTag};

/// A value plus the union of tags of every value that contributed to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaintedData {
    pub value: Value,
    #[serde(default)]
    pub tags: TaintSet,
}

impl TaintedData {
    pub fn new(value: Value, tags: TaintSet) -> Self {
        Self { value, tags }
    }

    pub fn untainted(value: Value) -> Self {
        Self::new(value, TaintSet::new())
    }

    pub fn with_tag(mut self, tag: TaintTag) -> Self {
        self.tags.insert(tag);
        self
    }

    /// Build a value derived from several inputs
    ///
    /// The result carries the union of all input tags; nothing is dropped.
    pub fn derive<'a, I>(value: Value, inputs: I) -> Self
    where
        I: IntoIterator<Item = &'a TaintedData>,
    {
        let mut tags = TaintSet::new();
        for input in inputs {
            tags.extend(&input.tags);
        }
        Self::new(value, tags)
    }

    /// Transform the value, keeping every tag
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(Value) -> Value,
    {
        Self::new(f(self.value), self.tags)
    }

    pub fn max_sensitivity(&self) -> Option<Sensitivity> {
        self.tags.max_sensitivity()
    }

    pub fn is_tainted(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn into_parts(self) -> (Value, TaintSet) {
        (self.value, self.tags)
    }
}

impl From<Value> for TaintedData {
    fn from(value: Value) -> Self {
        Self::untainted(value)
    }
}
