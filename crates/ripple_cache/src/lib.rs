//! Incremental cache signatures for pipeline nodes.
//!
//! This crate decides, per node of a computation graph, whether a previous
//! run's output can be reused. Each node gets a composite signature built
//! from its source text, an environment token, a structural fingerprint of
//! its direct inputs, and the current-run signatures of its parents, so
//! any upstream change invalidates every downstream node without ever
//! hashing node outputs. Outputs are stored as opaque blobs and loaded
//! lazily, only when a consumer actually needs the value.

#![warn(missing_docs)]

pub mod backend;
pub mod blob;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod key;
pub mod meta;
pub mod pipeline;
pub mod signature;
pub mod stats;
pub mod value;

pub use backend::{CacheBackend, DiskBackend, MemoryBackend, RuntimeBackend};
pub use config::{load_config, load_config_from_str, BackendChoice, CacheConfig, ConfigError};
pub use coordinator::{CacheCoordinator, CacheDecision, DeferredValue};
pub use error::CacheError;
pub use fingerprint::{ObjectHasher, DEFAULT_DEPTH_BUDGET};
pub use key::make_cache_key;
pub use pipeline::{NodeSpec, PipelineSpec};
pub use signature::{NodeSignature, SignatureComputer};
pub use stats::{CacheEvent, CacheStats, Decision};
pub use value::{instance_identity, view_of, Bytes, Fingerprintable, ValueView};
