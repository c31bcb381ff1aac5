//! Configuration for packstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Main configuration for a packed store instance
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all physical files.
    /// Internal structure:
    ///   {store_dir}/
    ///     ├── {ns}/{key}.sj1     (single-piece files from writers)
    ///     └── {name}             (operator-named compacted files)
    pub store_dir: PathBuf,

    /// Extension for single-piece files (without the dot)
    pub file_extension: String,

    /// fsync piece files before their rows are committed
    pub sync_on_commit: bool,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Where the metadata index lives
    pub index: IndexLocation,

    /// How long a statement waits on a locked database (milliseconds)
    pub busy_timeout_ms: u64,

    /// Rows fetched per page while walking a namespace
    pub walk_batch_size: usize,
}

/// Location of the SQLite metadata index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    /// Private in-memory database (tests, throwaway stores)
    Memory,

    /// Database file on disk
    File(PathBuf),
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./packstore_data"),
            file_extension: "sj1".to_string(),
            sync_on_commit: true,
            index: IndexLocation::File(PathBuf::from("./packstore_data/index.db")),
            busy_timeout_ms: 10_000,
            walk_batch_size: 1000,
        }
    }
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Reject settings a store cannot run with
    pub fn validate(&self) -> Result<()> {
        let ext = &self.file_extension;
        if ext.is_empty() || ext.contains(|c: char| matches!(c, '/' | '\\' | '.')) {
            return Err(StoreError::Config(format!(
                "file extension must be a plain name without dots: {ext:?}"
            )));
        }
        if self.walk_batch_size == 0 {
            return Err(StoreError::Config(
                "walk batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for StoreConfig
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the store directory (root for all physical files)
    pub fn store_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_dir = path.into();
        self
    }

    /// Set the single-piece file extension
    pub fn file_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.file_extension = ext.into();
        self
    }

    /// Toggle fsync on commit
    pub fn sync_on_commit(mut self, sync: bool) -> Self {
        self.config.sync_on_commit = sync;
        self
    }

    /// Keep the index in memory
    pub fn in_memory_index(mut self) -> Self {
        self.config.index = IndexLocation::Memory;
        self
    }

    /// Keep the index in a database file
    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.index = IndexLocation::File(path.into());
        self
    }

    /// Set the busy timeout (in milliseconds)
    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.config.busy_timeout_ms = ms;
        self
    }

    /// Set the namespace walk page size
    pub fn walk_batch_size(mut self, rows: usize) -> Self {
        self.config.walk_batch_size = rows;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}
