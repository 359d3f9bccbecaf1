//! Deterministic, order-independent structural fingerprinting.
//!
//! [`ObjectHasher`] reduces a [`ValueView`] tree to a single
//! [`ContentHash`]. Unordered collections and record fields are sorted by
//! fingerprint (or field name) before hashing, so `{1, 2, 3}` and
//! `{3, 2, 1}` produce the same fingerprint. Recursion into records is
//! depth-limited; past the budget a record falls back to its instance
//! identity rather than risking an unbounded or partial walk.

use ripple_common::{ContentHash, HashWriter};
use tracing::{debug, warn};

use crate::value::{view_of, Fingerprintable, ValueView};

/// Default recursion budget for nested records.
pub const DEFAULT_DEPTH_BUDGET: u32 = 2;

// Domain-separation tags so values of different shapes can never collide
// on identical payload bytes.
const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_UINT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_STR: u8 = 0x05;
const TAG_BYTES: u8 = 0x06;
const TAG_SEQ: u8 = 0x07;
const TAG_SET: u8 = 0x08;
const TAG_MAP: u8 = 0x09;
const TAG_RECORD: u8 = 0x0a;
const TAG_IDENTITY: u8 = 0x0b;
const TAG_KEYED: u8 = 0x0c;
const TAG_RENDERED: u8 = 0x0d;

/// Structural fingerprinter with a configurable recursion budget.
#[derive(Debug, Clone)]
pub struct ObjectHasher {
    depth_budget: u32,
}

impl ObjectHasher {
    /// Creates a hasher with the given record-recursion budget.
    pub fn new(depth_budget: u32) -> Self {
        Self { depth_budget }
    }

    /// Returns the configured recursion budget.
    pub fn depth_budget(&self) -> u32 {
        self.depth_budget
    }

    /// Computes the fingerprint of a value.
    ///
    /// A value advertising the cache-key capability is hashed from its key
    /// alone; everything else is hashed from its structural view.
    pub fn fingerprint(&self, value: &dyn Fingerprintable) -> ContentHash {
        self.hash_view(&view_of(value), self.depth_budget)
    }

    /// Reduces a view to a fingerprint with the given remaining budget.
    pub fn hash_view(&self, view: &ValueView, budget: u32) -> ContentHash {
        let mut w = HashWriter::new();
        match view {
            ValueView::Null => w.write(&[TAG_NULL]),
            ValueView::Bool(b) => {
                w.write(&[TAG_BOOL, u8::from(*b)]);
            }
            ValueView::Int(i) => {
                w.write(&[TAG_INT]);
                w.write(&i.to_le_bytes());
            }
            ValueView::UInt(u) => {
                w.write(&[TAG_UINT]);
                w.write(&u.to_le_bytes());
            }
            ValueView::Float(f) => {
                w.write(&[TAG_FLOAT]);
                w.write(&f.to_bits().to_le_bytes());
            }
            ValueView::Str(s) => {
                w.write(&[TAG_STR]);
                w.write(s.as_bytes());
            }
            ValueView::Bytes(b) => {
                w.write(&[TAG_BYTES]);
                w.write(b);
            }
            ValueView::Seq(items) => {
                w.write(&[TAG_SEQ]);
                for item in items {
                    w.write_hash(&self.hash_view(item, budget));
                }
            }
            ValueView::Set(items) => {
                let mut hashes: Vec<ContentHash> =
                    items.iter().map(|item| self.hash_view(item, budget)).collect();
                hashes.sort();
                w.write(&[TAG_SET]);
                for hash in &hashes {
                    w.write_hash(hash);
                }
            }
            ValueView::Map(entries) => {
                let mut hashes: Vec<(ContentHash, ContentHash)> = entries
                    .iter()
                    .map(|(k, v)| (self.hash_view(k, budget), self.hash_view(v, budget)))
                    .collect();
                hashes.sort_by(|a, b| a.0.cmp(&b.0));
                w.write(&[TAG_MAP]);
                for (key_hash, value_hash) in &hashes {
                    w.write_hash(key_hash);
                    w.write_hash(value_hash);
                }
            }
            ValueView::Record {
                type_name,
                identity,
                fields,
            } => {
                if budget == 0 || fields.is_empty() {
                    // No usable public state at this depth: fingerprint by
                    // instance identity so distinct stateful instances
                    // never collide. Such values only hit across runs via
                    // the cache-key capability.
                    debug!(%type_name, "identity fallback for record fingerprint");
                    w.write(&[TAG_IDENTITY]);
                    w.write_str(type_name);
                    w.write(&identity.to_le_bytes());
                } else {
                    let mut field_hashes: Vec<(&str, ContentHash)> = fields
                        .iter()
                        .map(|(name, value)| {
                            (name.as_str(), self.hash_view(value, budget - 1))
                        })
                        .collect();
                    field_hashes.sort_by(|a, b| a.0.cmp(b.0));
                    w.write(&[TAG_RECORD]);
                    w.write_str(type_name);
                    for (name, hash) in &field_hashes {
                        w.write_str(name);
                        w.write_hash(hash);
                    }
                }
            }
            ValueView::Keyed(key) => {
                w.write(&[TAG_KEYED]);
                w.write(key.as_bytes());
            }
            ValueView::Rendered(rendering) => {
                warn!(
                    %rendering,
                    "hashing degraded: fingerprinting a value by its string rendering"
                );
                w.write(&[TAG_RENDERED]);
                w.write(rendering.as_bytes());
            }
        }
        w.finish()
    }
}

impl Default for ObjectHasher {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH_BUDGET)
    }
}
