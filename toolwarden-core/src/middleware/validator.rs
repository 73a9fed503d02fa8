//! Argument validation stage
//!
//! Validators run before any middleware. They are the only stage besides
//! policy middleware that can stop a call, and a failure is recorded as a
//! blocked call with `VALIDATION_ERROR`.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::JSONSchema;
use parking_lot::Mutex;
use serde_json::Value;

use crate::registry::ToolSpec;

pub trait ArgumentValidator: Send + Sync {
    fn name(&self) -> &str;

    /// Check arguments against the tool's definition
    fn validate(&self, spec: &ToolSpec, args: &Value) -> Result<(), String>;
}

/// Validates arguments against the tool's JSON schema
///
/// Compiled schemas are cached by schema fingerprint. Tools without a
/// schema accept any arguments.
#[derive(Default)]
pub struct SchemaValidator {
    compiled: Mutex<HashMap<String, Arc<JSONSchema>>>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn compiled_for(&self, spec: &ToolSpec, schema: &Value) -> Result<Arc<JSONSchema>, String> {
        let key = spec.schema_fingerprint().to_string();
        if let Some(compiled) = self.compiled.lock().get(&key) {
            return Ok(Arc::clone(compiled));
        }

        let compiled = JSONSchema::compile(schema)
            .map(Arc::new)
            .map_err(|err| format!("invalid schema for tool '{}': {}", spec.name, err))?;
        self.compiled.lock().insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }
}

impl ArgumentValidator for SchemaValidator {
    fn name(&self) -> &str {
        "schema"
    }

    fn validate(&self, spec: &ToolSpec, args: &Value) -> Result<(), String> {
        let schema = match &spec.input_schema {
            Some(schema) => schema,
            None => return Ok(()),
        };

        let compiled = self.compiled_for(spec, schema)?;
        let result = match compiled.validate(args) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let messages: Vec<String> = errors.map(|err| err.to_string()).collect();
                Err(format!("arguments do not match schema: {}", messages.join("; ")))
            }
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_file() -> ToolSpec {
        ToolSpec::new("write_file", "1.0").with_schema(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        }))
    }

    #[test]
    fn test_valid_arguments() {
        let validator = SchemaValidator::new();
        assert!(validator
            .validate(&write_file(), &json!({"path": "a.txt", "content": "hi"}))
            .is_ok());
    }

    #[test]
    fn test_invalid_arguments() {
        let validator = SchemaValidator::new();
        let err = validator
            .validate(&write_file(), &json!({"path": 7}))
            .unwrap_err();
        assert!(err.contains("arguments do not match schema"));
    }

    #[test]
    fn test_no_schema_accepts_anything() {
        let validator = SchemaValidator::new();
        let spec = ToolSpec::new("noop", "1.0");
        assert!(validator.validate(&spec, &json!([1, 2, 3])).is_ok());
    }

    #[test]
    fn test_invalid_schema_reported() {
        let validator = SchemaValidator::new();
        let spec = ToolSpec::new("broken", "1.0").with_schema(json!({"type": 12}));
        assert!(validator.validate(&spec, &json!({})).is_err());
    }
}
