//! Call fingerprints
//!
//! A fingerprint is the SHA-256 of the canonical form of
//! `(tool name, tool version, arguments)`. Object keys are sorted before
//! hashing, so two argument maps that differ only in key order produce the
//! same fingerprint in any process.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::WardenError;

/// Prefix identifying the digest algorithm
pub const FINGERPRINT_PREFIX: &str = "sha256:";

/// Stable identity of a call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a call
    pub fn compute(tool: &str, version: &str, args: &Value) -> Self {
        Self::of_canonical(&canonical_input(tool, version, args))
    }

    /// Hash an already-canonicalized call description
    pub fn of_canonical(canonical: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Fingerprint(format!("{}{}", FINGERPRINT_PREFIX, hex::encode(hasher.finalize())))
    }

    /// Wrap an existing fingerprint string (e.g. read back from a trace)
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Fingerprint(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical description of a call, the input of the fingerprint hash
pub fn canonical_input(tool: &str, version: &str, args: &Value) -> String {
    format!(
        "{}\u{0}{}\u{0}{}",
        tool,
        version,
        canonical_json(args)
    )
}

/// Canonical JSON serialization (sorted keys, no whitespace)
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let contents: Vec<String> = pairs
                .iter()
                .map(|(k, v)| {
                    let key = serde_json::to_string(k).unwrap_or_default();
                    format!("{}:{}", key, canonical_json(v))
                })
                .collect();
            format!("{{{}}}", contents.join(","))
        }
        Value::Array(arr) => {
            let contents: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", contents.join(","))
        }
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Entries kept by [`FingerprintLedger::new`]
pub const DEFAULT_LEDGER_CAPACITY: usize = 16_384;

/// Separates the ledger's check digest from the fingerprint hash itself
const LEDGER_DOMAIN: &[u8] = b"toolwarden/ledger/v1\0";

/// Remembers which canonical call produced each fingerprint
///
/// Shared by concurrent calls; a collision (two distinct canonical inputs
/// with one fingerprint) is reported to the caller instead of being dropped.
/// Only a fixed-size check digest of each input is stored, and once the
/// ledger holds `capacity` fingerprints the oldest one is forgotten.
#[derive(Debug)]
pub struct FingerprintLedger {
    capacity: usize,
    state: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    seen: HashMap<Fingerprint, [u8; 32]>,
    order: VecDeque<Fingerprint>,
}

impl FingerprintLedger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Record a fingerprint; returns a collision error if it was already
    /// bound to a different canonical input
    pub fn observe(
        &self,
        tool: &str,
        fingerprint: &Fingerprint,
        canonical: &str,
    ) -> Option<WardenError> {
        let digest = check_digest(canonical);
        let mut state = self.state.lock();
        match state.seen.get(fingerprint) {
            Some(existing) if *existing != digest => Some(WardenError::FingerprintCollision {
                fingerprint: fingerprint.to_string(),
                tool: tool.to_string(),
            }),
            Some(_) => None,
            None => {
                if state.seen.len() >= self.capacity {
                    if let Some(oldest) = state.order.pop_front() {
                        state.seen.remove(&oldest);
                    }
                }
                state.order.push_back(fingerprint.clone());
                state.seen.insert(fingerprint.clone(), digest);
                None
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().seen.is_empty()
    }
}

impl Default for FingerprintLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn check_digest(canonical: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(LEDGER_DOMAIN);
    hasher.update(canonical.as_bytes());
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let args = json!({"path": "a.txt", "content": "hi"});
        let first = Fingerprint::compute("write_file", "1.0", &args);
        let second = Fingerprint::compute("write_file", "1.0", &args);

        assert_eq!(first, second);
        assert!(first.as_str().starts_with(FINGERPRINT_PREFIX));
        assert_eq!(first.as_str().len(), FINGERPRINT_PREFIX.len() + 64);
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"path":"a.txt","content":"hi"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"content":"hi","path":"a.txt"}"#).unwrap();

        assert_eq!(
            Fingerprint::compute("write_file", "1.0", &a),
            Fingerprint::compute("write_file", "1.0", &b)
        );
    }

    #[test]
    fn test_fingerprint_changes_with_identity() {
        let args = json!({"path": "a.txt"});
        let base = Fingerprint::compute("read_file", "1.0", &args);

        assert_ne!(base, Fingerprint::compute("read_file", "1.1", &args));
        assert_ne!(base, Fingerprint::compute("stat_file", "1.0", &args));
        assert_ne!(base, Fingerprint::compute("read_file", "1.0", &json!({"path": "b.txt"})));
    }

    #[test]
    fn test_canonical_json_escapes_keys() {
        let value = json!({"b": 2, "a\"q": 1, "c": {"y": 2, "x": 1}});
        let canonical = canonical_json(&value);

        assert!(canonical.starts_with("{\"a\\\"q\":1"));
        assert!(canonical.contains("\"c\":{\"x\":1,\"y\":2}"));
    }

    #[test]
    fn test_ledger_detects_collision() {
        let ledger = FingerprintLedger::new();
        let forged = Fingerprint::from_raw("sha256:forged");

        assert!(ledger.observe("t", &forged, "t\u{0}1\u{0}{\"a\":1}").is_none());
        assert!(ledger.observe("t", &forged, "t\u{0}1\u{0}{\"a\":1}").is_none());

        let collision = ledger.observe("t", &forged, "t\u{0}1\u{0}{\"a\":2}");
        assert!(matches!(
            collision,
            Some(WardenError::FingerprintCollision { .. })
        ));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_ledger_forgets_oldest_at_capacity() {
        let ledger = FingerprintLedger::with_capacity(2);
        let large = format!("write_file\u{0}1.0\u{0}{}", "x".repeat(1 << 20));
        let prints: Vec<Fingerprint> = (0..3)
            .map(|n| Fingerprint::from_raw(format!("sha256:{n}")))
            .collect();

        for print in &prints {
            assert!(ledger.observe("write_file", print, &large).is_none());
        }
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.capacity(), 2);

        // The first fingerprint was evicted, so it is bound afresh
        assert!(ledger.observe("write_file", &prints[0], "other").is_none());
        // The newest ones are still checked
        assert!(ledger.observe("write_file", &prints[2], "other").is_some());
        assert_eq!(ledger.len(), 2);
    }
}
