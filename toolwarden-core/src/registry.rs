//! Tool registry
//!
//! An explicit registry object, built once and handed to the runtime.
//! The core only ever reads it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WardenError};
use crate::taint::{Sensitivity, TaintSource};
use crate::trace::{canonical_json, Fingerprint};

fn default_output_source() -> TaintSource {
    TaintSource::ToolOutput
}

/// Full definition of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub description: String,

    /// JSON schema for the arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    /// Sensitivity the tool's output carries on its own, regardless of input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_sensitivity: Option<Sensitivity>,

    /// Source recorded on the tag added for `output_sensitivity`
    #[serde(default = "default_output_source")]
    pub output_source: TaintSource,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            input_schema: None,
            output_sensitivity: None,
            output_source: default_output_source(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Tag every output of this tool at `sensitivity`
    pub fn with_output_taint(mut self, source: TaintSource, sensitivity: Sensitivity) -> Self {
        self.output_source = source;
        self.output_sensitivity = Some(sensitivity);
        self
    }

    /// Fingerprint of the canonical input schema
    pub fn schema_fingerprint(&self) -> Fingerprint {
        let schema = self.input_schema.clone().unwrap_or(Value::Null);
        Fingerprint::of_canonical(&canonical_json(&schema))
    }

    pub fn to_ref(&self) -> ToolSpecRef {
        ToolSpecRef::new(
            self.name.clone(),
            self.version.clone(),
            self.schema_fingerprint().to_string(),
        )
    }
}

/// Identity of a tool as seen by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolSpecRef {
    pub name: String,
    pub version: String,
    pub schema_fingerprint: String,
}

impl ToolSpecRef {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        schema_fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            schema_fingerprint: schema_fingerprint.into(),
        }
    }
}

impl std::fmt::Display for ToolSpecRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Registered tools, keyed by (name, version)
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<(String, String), ToolSpec>,
    /// Registration order, used to pick the latest version of a name
    order: Vec<(String, String)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a second registration of the same version fails
    pub fn register(&mut self, spec: ToolSpec) -> Result<ToolSpecRef> {
        if spec.name.trim().is_empty() || spec.version.trim().is_empty() {
            return Err(WardenError::Config {
                reason: "tool name and version must not be empty".to_string(),
            });
        }

        let key = (spec.name.clone(), spec.version.clone());
        if self.tools.contains_key(&key) {
            return Err(WardenError::ToolAlreadyRegistered {
                name: spec.name,
                version: spec.version,
            });
        }

        let tool_ref = spec.to_ref();
        tracing::debug!(tool = %tool_ref, "Registered tool");
        self.order.push(key.clone());
        self.tools.insert(key, spec);
        Ok(tool_ref)
    }

    pub fn with_tool(mut self, spec: ToolSpec) -> Result<Self> {
        self.register(spec)?;
        Ok(self)
    }

    pub fn get(&self, name: &str, version: &str) -> Option<&ToolSpec> {
        self.tools.get(&(name.to_string(), version.to_string()))
    }

    /// Spec behind a reference
    pub fn spec_for(&self, tool: &ToolSpecRef) -> Option<&ToolSpec> {
        self.get(&tool.name, &tool.version)
    }

    /// Resolve a reference by name, optionally pinned to a version
    ///
    /// Without a version, the most recently registered version wins.
    pub fn resolve(&self, name: &str, version: Option<&str>) -> Result<ToolSpecRef> {
        let spec = match version {
            Some(version) => self.get(name, version),
            None => self
                .order
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .and_then(|key| self.tools.get(key)),
        };

        spec.map(ToolSpec::to_ref)
            .ok_or_else(|| WardenError::ToolNotFound {
                name: name.to_string(),
                version: version.unwrap_or("latest").to_string(),
            })
    }

    /// All specs in registration order
    pub fn list(&self) -> Vec<&ToolSpec> {
        self.order.iter().filter_map(|k| self.tools.get(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
