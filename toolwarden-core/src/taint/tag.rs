//! Taint tags and tag sets
//!
//! A [`TaintTag`] labels data with where it came from, how sensitive it is,
//! and which step introduced it. A [`TaintSet`] is the ordered, de-duplicated
//! union of tags attached to a value; it only grows unless a tag is removed
//! through [`DataSanitizer`](super::DataSanitizer).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Where tagged data entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintSource {
    UserInput,
    ToolOutput,
    FileRead,
    NetworkResponse,
    Environment,
}

impl TaintSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaintSource::UserInput => "user_input",
            TaintSource::ToolOutput => "tool_output",
            TaintSource::FileRead => "file_read",
            TaintSource::NetworkResponse => "network_response",
            TaintSource::Environment => "environment",
        }
    }
}

impl fmt::Display for TaintSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensitivity levels, ordered from least to most sensitive
///
/// The derived ordering follows declaration order:
/// `Public < Internal < Confidential < Secret`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    #[default]
    Public,
    Internal,
    Confidential,
    Secret,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Public => "public",
            Sensitivity::Internal => "internal",
            Sensitivity::Confidential => "confidential",
            Sensitivity::Secret => "secret",
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Sensitivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Sensitivity::Public),
            "internal" => Ok(Sensitivity::Internal),
            "confidential" => Ok(Sensitivity::Confidential),
            "secret" => Ok(Sensitivity::Secret),
            _ => Err(format!("Unknown sensitivity: {}", s)),
        }
    }
}

/// A provenance/sensitivity label
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaintTag {
    pub source: TaintSource,
    pub sensitivity: Sensitivity,
    /// Step that introduced the data
    pub origin_step: String,
}

impl TaintTag {
    pub fn new(
        source: TaintSource,
        sensitivity: Sensitivity,
        origin_step: impl Into<String>,
    ) -> Self {
        Self {
            source,
            sensitivity,
            origin_step: origin_step.into(),
        }
    }
}

impl fmt::Display for TaintTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.source, self.sensitivity, self.origin_step)
    }
}

/// Union of taint tags attached to a value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaintSet {
    tags: BTreeSet<TaintTag>,
}

impl TaintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(tag: TaintTag) -> Self {
        let mut set = Self::new();
        set.insert(tag);
        set
    }

    /// Add a tag; returns true if it was not present yet
    pub fn insert(&mut self, tag: TaintTag) -> bool {
        self.tags.insert(tag)
    }

    /// Merge every tag of `other` into this set
    pub fn extend(&mut self, other: &TaintSet) {
        self.tags.extend(other.tags.iter().cloned());
    }

    /// Union of two sets without modifying either
    pub fn union(&self, other: &TaintSet) -> TaintSet {
        let mut merged = self.clone();
        merged.extend(other);
        merged
    }

    pub fn contains(&self, tag: &TaintTag) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_superset(&self, other: &TaintSet) -> bool {
        self.tags.is_superset(&other.tags)
    }

    /// Highest sensitivity in the set, `None` when empty
    pub fn max_sensitivity(&self) -> Option<Sensitivity> {
        self.tags.iter().map(|t| t.sensitivity).max()
    }

    /// Tags at or above the given sensitivity
    pub fn at_or_above(&self, level: Sensitivity) -> Vec<&TaintTag> {
        self.tags.iter().filter(|t| t.sensitivity >= level).collect()
    }

    /// Remove and return every tag matching the predicate
    ///
    /// Crate-private: removal is only reachable through the sanitizer so
    /// that every downgrade is recorded.
    pub(crate) fn remove_matching<F>(&mut self, mut predicate: F) -> Vec<TaintTag>
    where
        F: FnMut(&TaintTag) -> bool,
    {
        let removed: Vec<TaintTag> = self.tags.iter().filter(|t| predicate(t)).cloned().collect();
        for tag in &removed {
            self.tags.remove(tag);
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaintTag> {
        self.tags.iter()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn to_vec(&self) -> Vec<TaintTag> {
        self.tags.iter().cloned().collect()
    }
}

impl FromIterator<TaintTag> for TaintSet {
    fn from_iter<I: IntoIterator<Item = TaintTag>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TaintSet {
    type Item = &'a TaintTag;
    type IntoIter = std::collections::btree_set::Iter<'a, TaintTag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(source: TaintSource, sensitivity: Sensitivity, step: &str) -> TaintTag {
        TaintTag::new(source, sensitivity, step)
    }

    #[test]
    fn test_sensitivity_ordering() {
        assert!(Sensitivity::Public < Sensitivity::Internal);
        assert!(Sensitivity::Internal < Sensitivity::Confidential);
        assert!(Sensitivity::Confidential < Sensitivity::Secret);
        assert_eq!("secret".parse::<Sensitivity>().unwrap(), Sensitivity::Secret);
        assert!("classified".parse::<Sensitivity>().is_err());
    }

    #[test]
    fn test_union_is_superset_of_both() {
        let a = TaintSet::single(tag(TaintSource::UserInput, Sensitivity::Internal, "s1"));
        let b = TaintSet::single(tag(TaintSource::FileRead, Sensitivity::Secret, "s2"));

        let merged = a.union(&b);
        assert!(merged.is_superset(&a));
        assert!(merged.is_superset(&b));
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.max_sensitivity(), Some(Sensitivity::Secret));
    }

    #[test]
    fn test_duplicate_tags_collapse() {
        let mut set = TaintSet::new();
        assert!(set.insert(tag(TaintSource::Environment, Sensitivity::Secret, "s1")));
        assert!(!set.insert(tag(TaintSource::Environment, Sensitivity::Secret, "s1")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_at_or_above() {
        let set: TaintSet = vec![
            tag(TaintSource::UserInput, Sensitivity::Public, "s1"),
            tag(TaintSource::FileRead, Sensitivity::Confidential, "s2"),
            tag(TaintSource::Environment, Sensitivity::Secret, "s3"),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.at_or_above(Sensitivity::Confidential).len(), 2);
        assert!(TaintSet::new().max_sensitivity().is_none());
    }

    #[test]
    fn test_serializes_as_array() {
        let set = TaintSet::single(tag(TaintSource::NetworkResponse, Sensitivity::Internal, "s9"));
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "source": "network_response",
                "sensitivity": "internal",
                "origin_step": "s9"
            }])
        );
    }
}
