//! Durable blob storage with validated binary headers.
//!
//! Node outputs are opaque byte blobs stored in the `blobs/` subdirectory
//! of the cache. Each file carries a header with magic bytes, a format
//! version, the cache key it was stored under, and a checksum. Reads are
//! fail-safe: validation failures surface as a miss (`Ok(None)`), while
//! genuine I/O failures are errors so the caller can tell a broken cache
//! apart from an empty one.

use std::path::{Path, PathBuf};

use ripple_common::ContentHash;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CacheError;

/// Magic bytes identifying a Ripple cache blob.
const BLOB_MAGIC: [u8; 4] = *b"RPLB";

/// Current blob format version. Increment on breaking changes to the
/// header or payload layout.
const BLOB_FORMAT_VERSION: u32 = 1;

/// Subdirectory of the cache that holds blob files.
const BLOB_SUBDIR: &str = "blobs";

/// File extension for blob files.
const BLOB_EXT: &str = "blob";

/// Header prepended to every stored blob for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobHeader {
    /// Magic bytes: must be `b"RPLB"`.
    pub magic: [u8; 4],
    /// Blob format version.
    pub format_version: u32,
    /// Cache key the blob was stored under. The file name is a hash of
    /// this key, so the header copy guards against filename collisions.
    pub cache_key: String,
    /// Content hash of the payload (for integrity checks).
    pub checksum: ContentHash,
}

/// Blob store rooted at a cache directory.
#[derive(Debug)]
pub struct BlobStore {
    cache_dir: PathBuf,
}

impl BlobStore {
    /// Creates a blob store rooted at the given cache directory.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    /// Returns the file path for a cache key.
    ///
    /// Cache keys contain separators and arbitrary item identifiers, so
    /// the file name is the hex hash of the key rather than the key
    /// itself.
    pub fn blob_path(&self, key: &str) -> PathBuf {
        let stem = ContentHash::from_bytes(key.as_bytes());
        self.cache_dir
            .join(BLOB_SUBDIR)
            .join(format!("{stem}.{BLOB_EXT}"))
    }

    /// Writes a blob under the given cache key.
    pub fn write(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let dir = self.cache_dir.join(BLOB_SUBDIR);
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
            path: dir,
            source: e,
        })?;

        let header = BlobHeader {
            magic: BLOB_MAGIC,
            format_version: BLOB_FORMAT_VERSION,
            cache_key: key.to_string(),
            checksum: ContentHash::from_bytes(data),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        // Layout: 4-byte header length (little-endian) + header + payload.
        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + data.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(data);

        let path = self.blob_path(key);
        std::fs::write(&path, &output).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Reads the blob stored under the given cache key.
    ///
    /// Returns `Ok(None)` if the blob doesn't exist or fails validation
    /// (bad magic, wrong version, checksum or key mismatch); only genuine
    /// I/O failures are errors.
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.blob_path(key);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };
        Ok(Self::validate(&path, key, &raw))
    }

    fn validate(path: &Path, key: &str, raw: &[u8]) -> Option<Vec<u8>> {
        if raw.len() < 4 {
            warn!(path = %path.display(), "blob too short; treating as miss");
            return None;
        }
        let header_len = u32::from_le_bytes(raw[..4].try_into().ok()?) as usize;
        if raw.len() < 4 + header_len {
            warn!(path = %path.display(), "truncated blob header; treating as miss");
            return None;
        }

        let header: BlobHeader =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .ok()?
                .0;

        if header.magic != BLOB_MAGIC || header.format_version != BLOB_FORMAT_VERSION {
            warn!(path = %path.display(), "invalid blob header; treating as miss");
            return None;
        }
        if header.cache_key != key {
            warn!(
                path = %path.display(),
                stored = %header.cache_key,
                requested = key,
                "blob key mismatch; treating as miss"
            );
            return None;
        }

        let payload = &raw[4 + header_len..];
        if ContentHash::from_bytes(payload) != header.checksum {
            warn!(path = %path.display(), "blob checksum mismatch; treating as miss");
            return None;
        }

        Some(payload.to_vec())
    }

    /// Removes all stored blobs.
    pub fn clear(&self) -> Result<(), CacheError> {
        let dir = self.cache_dir.join(BLOB_SUBDIR);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io {
                path: dir,
                source: e,
            }),
        }
    }
}
