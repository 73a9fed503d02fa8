//! DLP policy evaluation
//!
//! [`evaluate`] is a pure function of (tags, tool, policy). Rules are checked
//! in two passes: every rule's `block_at` threshold first, then every
//! rule's `flag_at` threshold. The first rule that matches in a pass decides.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::taint::{Sensitivity, TaintSet, TaintSource, TaintTag};

/// Outcome of a DLP check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlpAction {
    /// Hard deny
    Block,
    /// Record a violation, let the call proceed
    Flag,
}

impl DlpAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlpAction::Block => "block",
            DlpAction::Flag => "flag",
        }
    }
}

fn all_tools() -> Vec<String> {
    vec!["*".to_string()]
}

/// One DLP rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlpRule {
    pub name: String,

    /// Glob patterns of tool names this rule applies to
    #[serde(default = "all_tools")]
    pub tools: Vec<String>,

    /// Only tags from these sources count; empty means any source
    #[serde(default)]
    pub sources: Vec<TaintSource>,

    #[serde(default)]
    pub block_at: Option<Sensitivity>,

    #[serde(default)]
    pub flag_at: Option<Sensitivity>,
}

impl DlpRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: all_tools(),
            sources: Vec::new(),
            block_at: None,
            flag_at: None,
        }
    }

    pub fn for_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_sources(mut self, sources: impl IntoIterator<Item = TaintSource>) -> Self {
        self.sources = sources.into_iter().collect();
        self
    }

    pub fn block_at(mut self, level: Sensitivity) -> Self {
        self.block_at = Some(level);
        self
    }

    pub fn flag_at(mut self, level: Sensitivity) -> Self {
        self.flag_at = Some(level);
        self
    }

    /// Whether the rule covers this tool
    ///
    /// Patterns that fail to compile never match; [`DlpPolicy::validate`]
    /// rejects them up front.
    pub fn applies_to(&self, tool: &str) -> bool {
        self.tools.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches(tool))
                .unwrap_or(false)
        })
    }

    fn offending<'a>(&self, tags: &'a TaintSet, threshold: Sensitivity) -> Vec<&'a TaintTag> {
        tags.iter()
            .filter(|t| t.sensitivity >= threshold)
            .filter(|t| self.sources.is_empty() || self.sources.contains(&t.source))
            .collect()
    }
}

/// Ordered set of DLP rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlpPolicy {
    #[serde(default)]
    pub rules: Vec<DlpRule>,
}

impl DlpPolicy {
    pub fn new(rules: Vec<DlpRule>) -> Self {
        Self { rules }
    }

    /// Policy that allows everything
    pub fn permissive() -> Self {
        Self { rules: Vec::new() }
    }

    /// Single rule covering every tool
    pub fn threshold(block_at: Option<Sensitivity>, flag_at: Option<Sensitivity>) -> Self {
        let mut rule = DlpRule::new("threshold");
        rule.block_at = block_at;
        rule.flag_at = flag_at;
        Self { rules: vec![rule] }
    }

    pub fn with_rule(mut self, rule: DlpRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Reject empty names and invalid tool patterns
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(WardenError::Config {
                    reason: "DLP rule name must not be empty".to_string(),
                });
            }
            for pattern in &rule.tools {
                glob::Pattern::new(pattern).map_err(|e| WardenError::Config {
                    reason: format!(
                        "DLP rule '{}' has invalid tool pattern '{}': {}",
                        rule.name, pattern, e
                    ),
                })?;
            }
        }
        Ok(())
    }
}

impl Default for DlpPolicy {
    /// Block secret data, flag confidential data, for every tool
    fn default() -> Self {
        Self::threshold(Some(Sensitivity::Secret), Some(Sensitivity::Confidential))
    }
}

/// A block or flag decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlpDecision {
    pub action: DlpAction,
    pub rule: String,
    pub reason: String,
    pub offending: Vec<TaintTag>,
}

/// Evaluate tags flowing into (or out of) `tool` against `policy`
///
/// Returns `None` when the data is allowed without comment.
pub fn evaluate(tags: &TaintSet, tool: &str, policy: &DlpPolicy) -> Option<DlpDecision> {
    if tags.is_empty() {
        return None;
    }

    let passes: [(DlpAction, fn(&DlpRule) -> Option<Sensitivity>); 2] = [
        (DlpAction::Block, |r| r.block_at),
        (DlpAction::Flag, |r| r.flag_at),
    ];

    for (action, threshold_of) in passes {
        for rule in &policy.rules {
            let threshold = match threshold_of(rule) {
                Some(threshold) => threshold,
                None => continue,
            };
            if !rule.applies_to(tool) {
                continue;
            }

            let offending = rule.offending(tags, threshold);
            if offending.is_empty() {
                continue;
            }

            let reason = format!(
                "{} tag(s) at or above '{}' reached tool '{}' (rule '{}')",
                offending.len(),
                threshold,
                tool,
                rule.name
            );
            return Some(DlpDecision {
                action,
                rule: rule.name.clone(),
                reason,
                offending: offending.into_iter().cloned().collect(),
            });
        }
    }
    None
}
