//! Cache storage backends.
//!
//! A backend is a pair of identically-keyed stores: signature metadata and
//! opaque output blobs. The ephemeral and durable forms differ only in
//! persistence medium; the coordinator treats them identically.

use std::collections::HashMap;
use std::path::Path;

use crate::blob::BlobStore;
use crate::error::CacheError;
use crate::meta::SignatureIndex;
use crate::signature::NodeSignature;

/// Storage contract shared by the ephemeral and durable backends.
///
/// Signature and blob entries are independent: a signature is always
/// written, while its blob may never be read (lazy materialization) in a
/// given run. An absent entry is `Ok(None)`; `Err` is the
/// cache-unavailable condition and is never used for a plain miss.
pub trait CacheBackend {
    /// Retrieves the stored signature for a cache key.
    fn get_signature(&self, key: &str) -> Result<Option<NodeSignature>, CacheError>;

    /// Stores a signature under its cache key.
    fn put_signature(&mut self, signature: &NodeSignature) -> Result<(), CacheError>;

    /// Retrieves the blob stored under a cache key.
    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores a blob under a cache key.
    fn put_blob(&mut self, key: &str, data: &[u8]) -> Result<(), CacheError>;

    /// Removes all stored signatures and blobs.
    fn clear(&mut self) -> Result<(), CacheError>;
}

/// Ephemeral backend: process-lifetime storage, no persistence.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    signatures: HashMap<String, NodeSignature>,
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    /// Creates an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryBackend {
    fn get_signature(&self, key: &str) -> Result<Option<NodeSignature>, CacheError> {
        Ok(self.signatures.get(key).cloned())
    }

    fn put_signature(&mut self, signature: &NodeSignature) -> Result<(), CacheError> {
        self.signatures
            .insert(signature.cache_key.clone(), signature.clone());
        Ok(())
    }

    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.blobs.get(key).cloned())
    }

    fn put_blob(&mut self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        self.blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.signatures.clear();
        self.blobs.clear();
        Ok(())
    }
}

/// Durable backend rooted at a configurable cache directory.
///
/// Signatures live in a JSON index written through on every put; blobs
/// live as individual files in a `blobs/` subdirectory. Concurrent
/// writers from other processes race with last-write-wins semantics on
/// the index; that is an accepted limitation.
#[derive(Debug)]
pub struct DiskBackend {
    cache_dir: std::path::PathBuf,
    index: SignatureIndex,
    blobs: BlobStore,
}

impl DiskBackend {
    /// Opens (or initializes) a durable backend at the given directory.
    ///
    /// A missing, corrupt, or format-incompatible existing index is
    /// discarded and replaced by an empty one; an index that cannot be
    /// read at all is an error, so storage trouble surfaces here instead
    /// of masquerading as an empty cache.
    pub fn open(cache_dir: &Path) -> Result<Self, CacheError> {
        let index = SignatureIndex::load(cache_dir)?.unwrap_or_default();
        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            index,
            blobs: BlobStore::new(cache_dir),
        })
    }

    /// Returns the cache directory this backend is rooted at.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

impl CacheBackend for DiskBackend {
    fn get_signature(&self, key: &str) -> Result<Option<NodeSignature>, CacheError> {
        Ok(self.index.entries.get(key).cloned())
    }

    fn put_signature(&mut self, signature: &NodeSignature) -> Result<(), CacheError> {
        self.index
            .entries
            .insert(signature.cache_key.clone(), signature.clone());
        self.index.save(&self.cache_dir)
    }

    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.blobs.read(key)
    }

    fn put_blob(&mut self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        self.blobs.write(key, data)
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.index = SignatureIndex::new();
        SignatureIndex::remove_file(&self.cache_dir)?;
        self.blobs.clear()
    }
}

/// Backend selected at runtime from configuration.
pub enum RuntimeBackend {
    /// In-memory storage.
    Memory(MemoryBackend),
    /// On-disk storage.
    Disk(DiskBackend),
}

impl CacheBackend for RuntimeBackend {
    fn get_signature(&self, key: &str) -> Result<Option<NodeSignature>, CacheError> {
        match self {
            RuntimeBackend::Memory(b) => b.get_signature(key),
            RuntimeBackend::Disk(b) => b.get_signature(key),
        }
    }

    fn put_signature(&mut self, signature: &NodeSignature) -> Result<(), CacheError> {
        match self {
            RuntimeBackend::Memory(b) => b.put_signature(signature),
            RuntimeBackend::Disk(b) => b.put_signature(signature),
        }
    }

    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self {
            RuntimeBackend::Memory(b) => b.get_blob(key),
            RuntimeBackend::Disk(b) => b.get_blob(key),
        }
    }

    fn put_blob(&mut self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        match self {
            RuntimeBackend::Memory(b) => b.put_blob(key, data),
            RuntimeBackend::Disk(b) => b.put_blob(key, data),
        }
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        match self {
            RuntimeBackend::Memory(b) => b.clear(),
            RuntimeBackend::Disk(b) => b.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureComputer;

    fn sample_signature(key: &str, source: &str) -> NodeSignature {
        SignatureComputer::new(None, 2).compute(key, source, &[], &[])
    }

    fn exercise_backend<B: CacheBackend>(backend: &mut B) {
        let sig = sample_signature("foo", "fn foo");
        assert!(backend.get_signature("foo").unwrap().is_none());

        backend.put_signature(&sig).unwrap();
        let stored = backend.get_signature("foo").unwrap().unwrap();
        assert!(stored.matches(&sig));

        // Signature present, blob not yet written: lazy entries are legal.
        assert!(backend.get_blob("foo").unwrap().is_none());

        backend.put_blob("foo", b"output bytes").unwrap();
        assert_eq!(backend.get_blob("foo").unwrap().unwrap(), b"output bytes");

        backend.clear().unwrap();
        assert!(backend.get_signature("foo").unwrap().is_none());
        assert!(backend.get_blob("foo").unwrap().is_none());
    }

    #[test]
    fn memory_backend_contract() {
        exercise_backend(&mut MemoryBackend::new());
    }

    #[test]
    fn disk_backend_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise_backend(&mut DiskBackend::open(dir.path()).unwrap());
    }

    #[test]
    fn runtime_backend_delegates() {
        exercise_backend(&mut RuntimeBackend::Memory(MemoryBackend::new()));
    }

    #[test]
    fn disk_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let sig = sample_signature("foo", "fn foo");
        {
            let mut backend = DiskBackend::open(dir.path()).unwrap();
            backend.put_signature(&sig).unwrap();
            backend.put_blob("foo", b"persisted").unwrap();
        }
        let backend = DiskBackend::open(dir.path()).unwrap();
        assert!(backend.get_signature("foo").unwrap().unwrap().matches(&sig));
        assert_eq!(backend.get_blob("foo").unwrap().unwrap(), b"persisted");
    }

    #[test]
    fn open_surfaces_index_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        // An index file that exists but cannot be read must not be
        // mistaken for an empty cache full of misses.
        std::fs::create_dir(dir.path().join("metadata.json")).unwrap();
        let err = DiskBackend::open(dir.path()).unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
    }

    #[test]
    fn memory_backend_is_ephemeral() {
        let mut backend = MemoryBackend::new();
        backend.put_blob("foo", b"x").unwrap();
        drop(backend);
        let backend = MemoryBackend::new();
        assert!(backend.get_blob("foo").unwrap().is_none());
    }

    #[test]
    fn item_scoped_keys_are_independent() {
        let mut backend = MemoryBackend::new();
        backend
            .put_signature(&sample_signature("node::a", "src"))
            .unwrap();
        assert!(backend.get_signature("node::b").unwrap().is_none());
        assert!(backend.get_signature("node").unwrap().is_none());
        assert!(backend.get_signature("node::a").unwrap().is_some());
    }
}
