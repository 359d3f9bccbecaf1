//! Durable signature index.
//!
//! The index is stored as `metadata.json` in the cache directory, mapping
//! each cache key to its last persisted [`NodeSignature`]. Loading is
//! fail-safe for bad content: a missing, corrupt, or format-incompatible
//! index starts fresh, turning every lookup into a miss. Genuine I/O
//! failures are errors, so a broken store is never mistaken for an empty
//! one.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CacheError;
use crate::signature::NodeSignature;

/// Name of the index file within the cache directory.
const META_FILE: &str = "metadata.json";

/// On-disk format version. Bump on breaking changes; incompatible indexes
/// are discarded wholesale.
pub const META_FORMAT_VERSION: u32 = 1;

/// Signature metadata index for the durable backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureIndex {
    /// Format version that produced this index.
    pub format_version: u32,
    /// Persisted signatures keyed by cache key.
    pub entries: HashMap<String, NodeSignature>,
}

impl SignatureIndex {
    /// Creates a new, empty index at the current format version.
    pub fn new() -> Self {
        Self {
            format_version: META_FORMAT_VERSION,
            entries: HashMap::new(),
        }
    }

    /// Loads the index from the cache directory.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, can't be parsed, or
    /// has an incompatible format version; only genuine I/O failures are
    /// errors, so the caller can tell an unavailable store apart from an
    /// empty one.
    pub fn load(cache_dir: &Path) -> Result<Option<Self>, CacheError> {
        let path = cache_dir.join(META_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };
        let index: Self = match serde_json::from_str(&content) {
            Ok(index) => index,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "discarding unparseable signature index"
                );
                return Ok(None);
            }
        };
        if index.format_version != META_FORMAT_VERSION {
            warn!(
                found = index.format_version,
                expected = META_FORMAT_VERSION,
                "discarding signature index with incompatible format version"
            );
            return Ok(None);
        }
        Ok(Some(index))
    }

    /// Saves the index to the cache directory, creating it if needed.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::Io {
            path: cache_dir.to_path_buf(),
            source: e,
        })?;
        let path = cache_dir.join(META_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        std::fs::write(&path, json).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Removes the index file from the cache directory if present.
    pub fn remove_file(cache_dir: &Path) -> Result<(), CacheError> {
        let path = cache_dir.join(META_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }
}

impl Default for SignatureIndex {
    fn default() -> Self {
        Self::new()
    }
}
