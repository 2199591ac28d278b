use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::decode_cache::DEFAULT_CAPACITY;
use crate::storage::types::DEFAULT_TTL_SECS;

pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;
pub const MIN_SWEEP_INTERVAL_MS: u64 = 50;
pub const MAX_SWEEP_INTERVAL_MS: u64 = 60_000;
pub const MAX_CACHE_CAPACITY: usize = 64;

/// Where captured images are kept between runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database file.
    #[default]
    Database,
    /// Plain directory, one file pair per capture.
    File,
    /// Nothing survives the process.
    Memory,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackend,
    /// Database file or storage directory. When unset the backend falls back
    /// to its environment variable, then to the working directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    pub ttl_secs: u64,
    pub sweep_interval_ms: u64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS as u64,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub capacity: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Values given on the command line, applied on top of the file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub ttl_secs: Option<u64>,
    pub storage_backend: Option<StorageBackend>,
    pub storage_path: Option<PathBuf>,
}
