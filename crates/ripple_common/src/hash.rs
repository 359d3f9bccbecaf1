//! Content hashing for signature computation and cache invalidation.

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

/// A 128-bit content hash computed using XXH3.
///
/// Two values with the same `ContentHash` are assumed to be identical.
/// XXH3 is unseeded here, so hashes are stable across processes and
/// machines; `Ord` is by raw byte order, which gives the deterministic
/// sort needed for order-independent collection fingerprints.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Returns the raw 16 hash bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Streaming writer for combining multiple parts into one [`ContentHash`].
///
/// Callers are responsible for framing: parts of variable length should be
/// length-prefixed (or separated by fixed-size hashes) so that distinct
/// part sequences cannot produce the same byte stream.
pub struct HashWriter(Xxh3);

impl HashWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self(Xxh3::new())
    }

    /// Appends raw bytes to the stream.
    pub fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    /// Appends a length-prefixed string to the stream.
    pub fn write_str(&mut self, s: &str) {
        self.0.update(&(s.len() as u64).to_le_bytes());
        self.0.update(s.as_bytes());
    }

    /// Appends a previously computed hash to the stream.
    pub fn write_hash(&mut self, hash: &ContentHash) {
        self.0.update(hash.as_bytes());
    }

    /// Finishes the stream and returns the combined hash.
    pub fn finish(self) -> ContentHash {
        ContentHash(self.0.digest128().to_le_bytes())
    }
}

impl Default for HashWriter {
    fn default() -> Self {
        Self::new()
    }
}
