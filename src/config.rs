//! Configuration for caskkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a cask instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Cask directory holding every file of the store
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── LOCK                     (advisory writer lock)
    ///     ├── 00000000000000000001.data (segment)
    ///     └── 00000000000000000001.hint (hint for a sealed segment)
    pub data_dir: PathBuf,

    /// Sync strategy: how often to fsync the active segment
    pub sync_strategy: SyncStrategy,

    /// Rotate the active segment once it would grow past this many bytes.
    /// `None` keeps a single active segment until the next merge or close.
    pub max_segment_size: Option<u64>,

    // -------------------------------------------------------------------------
    // Limits
    // -------------------------------------------------------------------------
    /// Largest accepted key, in bytes
    pub max_key_size: usize,

    /// Largest accepted value, in bytes
    pub max_value_size: usize,

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------
    /// Run a merge as part of `Engine::close`
    pub merge_on_close: bool,
}

/// Segment sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced writes (balanced durability/performance)
    EveryNWrites { count: usize },

    /// Only fsync on explicit `sync()`, merge and close
    Manual,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./caskkv_data"),
            sync_strategy: SyncStrategy::EveryNWrites { count: 100 },
            max_segment_size: None,
            max_key_size: u32::MAX as usize,
            max_value_size: u32::MAX as usize,
            merge_on_close: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the cask directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Rotate the active segment past `bytes`
    pub fn max_segment_size(mut self, bytes: u64) -> Self {
        self.config.max_segment_size = Some(bytes);
        self
    }

    /// Set the maximum key size (in bytes)
    pub fn max_key_size(mut self, size: usize) -> Self {
        self.config.max_key_size = size;
        self
    }

    /// Set the maximum value size (in bytes)
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.config.max_value_size = size;
        self
    }

    /// Enable or disable the merge performed by `close`
    pub fn merge_on_close(mut self, enabled: bool) -> Self {
        self.config.merge_on_close = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
