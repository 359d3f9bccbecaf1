//! Error types for cache operations.

use std::path::PathBuf;

/// Errors surfaced by the caching subsystem.
///
/// Storage I/O failures (`Io`) are the cache-unavailable condition: they
/// are returned to the caller, who chooses between degrading to a forced
/// miss ([`CacheCoordinator::force_miss`](crate::CacheCoordinator::force_miss))
/// and aborting the run. Corrupt durable entries are not errors; they fail
/// safe to a miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache storage.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// A node name was not found in the pipeline definition.
    #[error("unknown node '{name}'")]
    UnknownNode {
        /// The missing node name.
        name: String,
    },

    /// Two nodes in the pipeline definition share a name.
    #[error("duplicate node '{name}' in pipeline definition")]
    DuplicateNode {
        /// The duplicated node name.
        name: String,
    },

    /// A node lists a parent that is not defined in the pipeline.
    #[error("node '{node}' references unknown parent '{parent}'")]
    UnknownParent {
        /// The node declaring the dependency.
        node: String,
        /// The parent name that could not be found.
        parent: String,
    },

    /// A node appears before one of its parents in the pipeline order.
    #[error("node '{node}' precedes its parent '{parent}'; pipeline order must be topological")]
    NotTopological {
        /// The out-of-place node.
        node: String,
        /// The parent that appears later in the node list.
        parent: String,
    },

    /// A node was visited before its parent's signature was resolved this run.
    #[error("no current signature for parent '{parent}' of node '{node}'; visit nodes in pipeline order")]
    ParentNotVisited {
        /// The node being visited.
        node: String,
        /// The parent whose current-run signature is missing.
        parent: String,
    },

    /// `report_result` was called for a cache key with no pending miss.
    #[error("no pending execution for cache key '{key}'")]
    NoPendingExecution {
        /// The cache key that was reported.
        key: String,
    },

    /// A stored signature exists but its blob could not be found.
    #[error("missing blob for cache key '{key}'")]
    MissingBlob {
        /// The cache key whose blob is absent.
        key: String,
    },

    /// A mapped-node operation was applied to the wrong kind of node.
    #[error("node '{node}' {reason}")]
    MapAxisMismatch {
        /// The node named in the operation.
        node: String,
        /// What was wrong (e.g. "has no map axis").
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::Io {
            path: PathBuf::from("/tmp/cache/metadata.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("metadata.json"));
    }

    #[test]
    fn serialization_display() {
        let err = CacheError::Serialization {
            reason: "invalid bincode data".to_string(),
        };
        assert!(err.to_string().contains("invalid bincode data"));
    }

    #[test]
    fn unknown_node_display() {
        let err = CacheError::UnknownNode {
            name: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "unknown node 'missing'");
    }

    #[test]
    fn not_topological_display() {
        let err = CacheError::NotTopological {
            node: "child".to_string(),
            parent: "parent".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'child'"));
        assert!(msg.contains("'parent'"));
    }

    #[test]
    fn no_pending_execution_display() {
        let err = CacheError::NoPendingExecution {
            key: "foo::item1".to_string(),
        };
        assert!(err.to_string().contains("foo::item1"));
    }

    #[test]
    fn missing_blob_display() {
        let err = CacheError::MissingBlob {
            key: "bar".to_string(),
        };
        assert!(err.to_string().contains("missing blob"));
    }
}
