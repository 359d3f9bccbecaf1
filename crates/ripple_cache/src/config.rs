//! Cache configuration, loaded from the `[cache]` table of `ripple.toml`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::backend::{DiskBackend, MemoryBackend, RuntimeBackend};
use crate::error::CacheError;
use crate::fingerprint::DEFAULT_DEPTH_BUDGET;

/// Errors that can occur when loading or validating cache configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Which storage backend to use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    /// Process-lifetime, in-memory storage.
    Ephemeral,
    /// Persistent storage rooted at the given directory.
    Durable {
        /// Cache directory path.
        path: PathBuf,
    },
}

impl BackendChoice {
    /// Opens the selected backend.
    ///
    /// Opening an ephemeral backend cannot fail; a durable backend
    /// surfaces storage I/O errors from reading its signature index.
    pub fn open(&self) -> Result<RuntimeBackend, CacheError> {
        match self {
            BackendChoice::Ephemeral => Ok(RuntimeBackend::Memory(MemoryBackend::new())),
            BackendChoice::Durable { path } => {
                Ok(RuntimeBackend::Disk(DiskBackend::open(path)?))
            }
        }
    }
}

/// Caching behavior configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch. Caching is opt-in; when off, every node executes
    /// and nothing is stored.
    pub enabled: bool,
    /// Storage backend selection.
    pub backend: BackendChoice,
    /// Manual cache-busting token mixed into every signature (e.g. a
    /// model-version string). Absent means the empty token.
    pub env_hash: Option<String>,
    /// Recursion budget for structural fingerprints of record values.
    pub dependency_depth: u32,
    /// Whether mapped nodes get one cache entry per item.
    pub per_item_caching: bool,
    /// Whether to log a per-run summary of cache decisions.
    pub verbose: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: BackendChoice::Ephemeral,
            env_hash: None,
            dependency_depth: DEFAULT_DEPTH_BUDGET,
            per_item_caching: true,
            verbose: true,
        }
    }
}

/// Top-level configuration file wrapper: only the `[cache]` table is
/// recognized here.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cache: CacheConfig,
}

/// Loads cache configuration from `<project_dir>/ripple.toml`.
///
/// A missing file yields the defaults (caching disabled).
pub fn load_config(project_dir: &Path) -> Result<CacheConfig, ConfigError> {
    let config_path = project_dir.join("ripple.toml");
    let content = match std::fs::read_to_string(&config_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(CacheConfig::default())
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };
    load_config_from_str(&content)
}

/// Parses and validates cache configuration from TOML text.
pub fn load_config_from_str(content: &str) -> Result<CacheConfig, ConfigError> {
    let file: ConfigFile =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&file.cache)?;
    Ok(file.cache)
}

fn validate(config: &CacheConfig) -> Result<(), ConfigError> {
    if let BackendChoice::Durable { path } = &config.backend {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "cache.backend.durable.path must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}
