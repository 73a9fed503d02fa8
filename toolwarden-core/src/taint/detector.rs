//! Content-based taint detection
//!
//! Scans string leaves of a JSON value with regex rules and labels matching
//! data, so raw user input can be tagged before it enters the pipeline.

use regex::Regex;
use serde_json::Value;

use crate::error::{Result, WardenError};
use crate::taint::{Sensitivity, TaintSource, TaintTag, TaintedData};

/// A compiled detection rule
pub struct DetectionRule {
    pub name: String,
    pattern: Regex,
    pub sensitivity: Sensitivity,
}

impl DetectionRule {
    pub fn new(name: impl Into<String>, pattern: &str, sensitivity: Sensitivity) -> Result<Self> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|e| WardenError::Config {
            reason: format!("invalid detection pattern '{}': {}", name, e),
        })?;
        Ok(Self {
            name,
            pattern,
            sensitivity,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// A rule that matched somewhere in a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub rule: String,
    pub sensitivity: Sensitivity,
    /// JSON pointer of the matching string
    pub pointer: String,
}

pub struct TaintDetector {
    rules: Vec<DetectionRule>,
}

impl TaintDetector {
    /// Detector without rules
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Detector with the built-in credential and PII rules
    pub fn new() -> Self {
        let builtin: [(&str, &str, Sensitivity); 5] = [
            (
                "private_key",
                r"-----BEGIN (?:[A-Z]+ )?PRIVATE KEY-----",
                Sensitivity::Secret,
            ),
            ("aws_access_key", r"\bAKIA[0-9A-Z]{16}\b", Sensitivity::Secret),
            (
                "api_token",
                r"\b(?:sk|pk|ghp|xox[bp])[-_][A-Za-z0-9_-]{16,}\b",
                Sensitivity::Secret,
            ),
            (
                "bearer_token",
                r"(?i)\bbearer\s+[A-Za-z0-9._~+/-]{20,}=*",
                Sensitivity::Secret,
            ),
            (
                "email",
                r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
                Sensitivity::Confidential,
            ),
        ];

        let rules = builtin
            .iter()
            .filter_map(|(name, pattern, sensitivity)| {
                DetectionRule::new(*name, pattern, *sensitivity).ok()
            })
            .collect();
        Self { rules }
    }

    /// Add a custom rule
    pub fn add_rule(&mut self, name: &str, pattern: &str, sensitivity: Sensitivity) -> Result<()> {
        self.rules.push(DetectionRule::new(name, pattern, sensitivity)?);
        Ok(())
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }

    /// Every rule match over the string leaves of `value`
    pub fn scan(&self, value: &Value) -> Vec<Detection> {
        let mut detections = Vec::new();
        self.scan_into(value, String::new(), &mut detections);
        detections
    }

    fn scan_into(&self, value: &Value, pointer: String, out: &mut Vec<Detection>) {
        match value {
            Value::String(text) => {
                for rule in &self.rules {
                    if rule.is_match(text) {
                        out.push(Detection {
                            rule: rule.name.clone(),
                            sensitivity: rule.sensitivity,
                            pointer: pointer.clone(),
                        });
                    }
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.scan_into(item, format!("{}/{}", pointer, i), out);
                }
            }
            Value::Object(map) => {
                for (key, item) in map {
                    let escaped = key.replace('~', "~0").replace('/', "~1");
                    self.scan_into(item, format!("{}/{}", pointer, escaped), out);
                }
            }
            _ => {}
        }
    }

    /// Wrap a value, tagging it at the highest detected sensitivity
    ///
    /// Values with no detection still get a `public` tag for `source`, so
    /// their provenance is tracked.
    pub fn label(&self, value: Value, source: TaintSource, origin_step: &str) -> TaintedData {
        let sensitivity = self
            .scan(&value)
            .iter()
            .map(|d| d.sensitivity)
            .max()
            .unwrap_or_default();
        TaintedData::untainted(value).with_tag(TaintTag::new(source, sensitivity, origin_step))
    }
}

impl Default for TaintDetector {
    fn default() -> Self {
        Self::new()
    }
}
