//! Ingest Configuration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::btree::DEFAULT_DEGREE;

/// 10 GiB
pub const DEFAULT_MEMORY_BUDGET: u64 = 10_737_418_240;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Supplied minimum degree too small
    #[error("degree: {0} must be >=2")]
    DegreeTooSmall(usize),

    /// A zero budget would flush before every record
    #[error("memory budget must be > 0")]
    ZeroBudget,

    /// Storage location is not a directory
    #[error("storage directory does not exist: {0}")]
    NotADirectory(PathBuf),
}

/// Everything an [`Ingestor`](crate::Ingestor) needs to know.
///
/// Missing fields take their default when loaded from a file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Where segment files are written.
    pub storage_dir: PathBuf,
    /// Raw input bytes to buffer before flushing.
    pub memory_budget: u64,
    /// Minimum degree of the in-memory index.
    pub degree: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("."),
            memory_budget: DEFAULT_MEMORY_BUDGET,
            degree: DEFAULT_DEGREE,
        }
    }
}

impl IngestConfig {
    /// Configuration for `storage_dir` with the specified budget and default degree.
    pub fn new<P: AsRef<Path>>(storage_dir: P, memory_budget: u64) -> Self {
        Self {
            storage_dir: storage_dir.as_ref().to_path_buf(),
            memory_budget,
            ..Default::default()
        }
    }

    /// Replace the index degree.
    pub fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    /// Load a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(origin: P) -> Result<Self> {
        let path = origin.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("could not parse config: {}", path.display()))
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.degree < 2 {
            return Err(ConfigError::DegreeTooSmall(self.degree).into());
        }
        if self.memory_budget == 0 {
            return Err(ConfigError::ZeroBudget.into());
        }
        if !self.storage_dir.is_dir() {
            return Err(ConfigError::NotADirectory(self.storage_dir.clone()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_defaults_sensibly() {
        let config = IngestConfig::default();
        assert_eq!(config.memory_budget, 10 * 1024 * 1024 * 1024);
        assert_eq!(config.degree, 32);
        config.validate().expect("cwd exists");
    }

    #[test]
    fn it_loads_partial_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"memory_budget": 4096}"#).expect("writes");
        let config = IngestConfig::from_file(&path).expect("loads");
        assert_eq!(config.memory_budget, 4096);
        assert_eq!(config.degree, DEFAULT_DEGREE);
        assert_eq!(config.storage_dir, PathBuf::from("."));
    }

    #[test]
    fn it_rejects_bad_configs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = IngestConfig::new(dir.path(), 0).validate().expect_err("zero");
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ZeroBudget)
        ));
        let err = IngestConfig::new(dir.path(), 10)
            .with_degree(1)
            .validate()
            .expect_err("degree");
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::DegreeTooSmall(1))
        ));
        let missing = dir.path().join("missing");
        let err = IngestConfig::new(&missing, 10).validate().expect_err("dir");
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NotADirectory(_))
        ));
    }
}
