//! Configuration for kvstate
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Main configuration for a kvstate store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Path of the database file (one file per partition store)
    pub path: PathBuf,

    /// Page cache size in bytes; `None` keeps the engine default
    pub cache_size: Option<usize>,

    /// Durability of each commit
    pub sync_mode: SyncMode,

    // -------------------------------------------------------------------------
    // Iteration Configuration
    // -------------------------------------------------------------------------
    /// Entries a cursor pulls from the snapshot per refill
    pub cursor_batch_size: usize,
}

/// Commit durability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// fsync before commit returns (safest, slowest)
    Immediate,

    /// commit is visible immediately but persisted by a later commit
    Eventual,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./kvstate.redb"),
            cache_size: None,
            sync_mode: SyncMode::Immediate,
            cursor_batch_size: 256,
        }
    }
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.cursor_batch_size == 0 {
            return Err(StoreError::Config(
                "cursor_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.cache_size == Some(0) {
            return Err(StoreError::Config(
                "cache_size must be greater than zero when set".to_string(),
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
    /// Set the database file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the page cache size (in bytes)
    pub fn cache_size(mut self, size: usize) -> Self {
        self.config.cache_size = Some(size);
        self
    }

    /// Set the commit durability
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.config.sync_mode = mode;
        self
    }

    /// Set the cursor refill batch size
    pub fn cursor_batch_size(mut self, size: usize) -> Self {
        self.config.cursor_batch_size = size;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}
