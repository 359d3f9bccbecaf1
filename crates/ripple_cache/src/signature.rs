//! Node signature computation.
//!
//! A node's signature combines four component hashes: its exact source
//! text, a caller-supplied environment token, a structural fingerprint of
//! its direct (non-parent) inputs, and the ordered current-run composite
//! signatures of its parents. The composite hash is a pure function of
//! those four parts; the timestamp is bookkeeping only and never
//! participates in comparison.

use std::time::{SystemTime, UNIX_EPOCH};

use ripple_common::{ContentHash, HashWriter};
use serde::{Deserialize, Serialize};

use crate::fingerprint::ObjectHasher;
use crate::value::Fingerprintable;

/// Signature of one node (or one item of a mapped node) for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSignature {
    /// The cache key this signature was computed for.
    pub cache_key: String,
    /// Hash of the node function's exact source text.
    pub code_hash: ContentHash,
    /// Hash of the environment token (manual cache-busting knob).
    pub env_hash: ContentHash,
    /// Fingerprint of the node's direct inputs.
    pub inputs_hash: ContentHash,
    /// Hash of the parents' current-run composite signatures, in declared
    /// dependency order.
    pub deps_hash: ContentHash,
    /// Combined hash of the four components above.
    pub composite_hash: ContentHash,
    /// Unix seconds when the signature was computed. Informational only.
    pub timestamp: u64,
}

impl NodeSignature {
    /// Returns `true` if the two signatures agree on code, environment,
    /// inputs, and dependencies. Timestamps are ignored.
    pub fn matches(&self, other: &NodeSignature) -> bool {
        self.composite_hash == other.composite_hash
    }
}

/// Computes [`NodeSignature`]s from node descriptions.
#[derive(Debug, Clone)]
pub struct SignatureComputer {
    hasher: ObjectHasher,
    env_hash: ContentHash,
}

impl SignatureComputer {
    /// Creates a computer with the given environment token and recursion
    /// budget. An absent token hashes as the empty string.
    pub fn new(env_token: Option<&str>, depth_budget: u32) -> Self {
        Self {
            hasher: ObjectHasher::new(depth_budget),
            env_hash: ContentHash::from_bytes(env_token.unwrap_or("").as_bytes()),
        }
    }

    /// Returns the hasher used for input fingerprints.
    pub fn hasher(&self) -> &ObjectHasher {
        &self.hasher
    }

    /// Computes the signature for one cache key.
    ///
    /// `parent_sigs` must be the parents' composite signatures freshly
    /// resolved for the current run, in the node's declared dependency
    /// order; this is what propagates upstream changes downstream.
    pub fn compute(
        &self,
        cache_key: &str,
        source: &str,
        direct_inputs: &[(&str, &dyn Fingerprintable)],
        parent_sigs: &[ContentHash],
    ) -> NodeSignature {
        let code_hash = ContentHash::from_bytes(source.as_bytes());

        // Direct inputs hash as a name -> fingerprint mapping in sorted
        // name order, so the caller's argument order is irrelevant.
        let mut entries: Vec<(&str, ContentHash)> = direct_inputs
            .iter()
            .map(|(name, value)| (*name, self.hasher.fingerprint(*value)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let mut w = HashWriter::new();
        for (name, hash) in &entries {
            w.write_str(name);
            w.write_hash(hash);
        }
        let inputs_hash = w.finish();

        let mut w = HashWriter::new();
        for sig in parent_sigs {
            w.write_hash(sig);
        }
        let deps_hash = w.finish();

        let mut w = HashWriter::new();
        w.write_hash(&code_hash);
        w.write_hash(&self.env_hash);
        w.write_hash(&inputs_hash);
        w.write_hash(&deps_hash);
        let composite_hash = w.finish();

        NodeSignature {
            cache_key: cache_key.to_string(),
            code_hash,
            env_hash: self.env_hash,
            inputs_hash,
            deps_hash,
            composite_hash,
            timestamp: unix_now(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn computer() -> SignatureComputer {
        SignatureComputer::new(None, 2)
    }

    #[test]
    fn recompute_is_stable() {
        let c = computer();
        let a = c.compute("node", "fn body", &[("x", &1i64)], &[]);
        let b = c.compute("node", "fn body", &[("x", &1i64)], &[]);
        assert!(a.matches(&b));
        assert_eq!(a.composite_hash, b.composite_hash);
    }

    #[test]
    fn input_argument_order_irrelevant() {
        let c = computer();
        let a = c.compute("node", "src", &[("x", &1i64), ("y", &2i64)], &[]);
        let b = c.compute("node", "src", &[("y", &2i64), ("x", &1i64)], &[]);
        assert!(a.matches(&b));
    }

    #[test]
    fn set_valued_input_order_independent() {
        let c = computer();
        let s1: HashSet<i64> = [1, 2, 3].into_iter().collect();
        let s2: HashSet<i64> = [3, 2, 1].into_iter().collect();
        let a = c.compute("node", "src", &[("s", &s1)], &[]);
        let b = c.compute("node", "src", &[("s", &s2)], &[]);
        assert_eq!(a.inputs_hash, b.inputs_hash);
    }

    #[test]
    fn whitespace_edit_changes_code_hash() {
        let c = computer();
        let a = c.compute("node", "fn f() { 1 }", &[], &[]);
        let b = c.compute("node", "fn f() {  1 }", &[], &[]);
        assert_ne!(a.code_hash, b.code_hash);
        assert!(!a.matches(&b));
    }

    #[test]
    fn env_token_busts_cache() {
        let v1 = SignatureComputer::new(Some("model-v1"), 2);
        let v2 = SignatureComputer::new(Some("model-v2"), 2);
        let a = v1.compute("node", "src", &[], &[]);
        let b = v2.compute("node", "src", &[], &[]);
        assert_ne!(a.env_hash, b.env_hash);
        assert!(!a.matches(&b));
    }

    #[test]
    fn absent_env_token_equals_empty() {
        let none = SignatureComputer::new(None, 2);
        let empty = SignatureComputer::new(Some(""), 2);
        let a = none.compute("node", "src", &[], &[]);
        let b = empty.compute("node", "src", &[], &[]);
        assert!(a.matches(&b));
    }

    #[test]
    fn parent_signature_change_propagates() {
        let c = computer();
        let p1 = ContentHash::from_bytes(b"parent run 1");
        let p2 = ContentHash::from_bytes(b"parent run 2");
        let a = c.compute("child", "src", &[("k", &0i64)], &[p1]);
        let b = c.compute("child", "src", &[("k", &0i64)], &[p2]);
        assert_ne!(a.deps_hash, b.deps_hash);
        assert!(!a.matches(&b));
    }

    #[test]
    fn parent_order_is_significant() {
        // deps_hash follows the declared dependency order, which is a
        // fixed property of the node shape, not of any collection order.
        let c = computer();
        let p1 = ContentHash::from_bytes(b"p1");
        let p2 = ContentHash::from_bytes(b"p2");
        let a = c.compute("child", "src", &[], &[p1, p2]);
        let b = c.compute("child", "src", &[], &[p2, p1]);
        assert_ne!(a.deps_hash, b.deps_hash);
    }

    #[test]
    fn timestamp_excluded_from_matching() {
        let c = computer();
        let mut a = c.compute("node", "src", &[], &[]);
        let b = c.compute("node", "src", &[], &[]);
        a.timestamp = 0;
        assert!(a.matches(&b));
    }

    #[test]
    fn serde_roundtrip() {
        let c = computer();
        let sig = c.compute("node", "src", &[("x", &5i64)], &[]);
        let json = serde_json::to_string(&sig).unwrap();
        let back: NodeSignature = serde_json::from_str(&json).unwrap();
        assert!(sig.matches(&back));
        assert_eq!(back.cache_key, "node");
    }
}
