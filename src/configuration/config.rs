use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use super::types::*;
use crate::ephemeral_store::StoreOptions;
use crate::error_handling::types::ConfigError;
use crate::storage::types::MAX_TTL_SECS;

/// Application configuration.
///
/// Read from a TOML file where every section and field is optional, then
/// patched with whatever was passed on the command line:
///
/// ```toml
/// [storage]
/// backend = "database"   # database | file | memory
/// path = "/var/lib/ephemera/ephemera.sqlite3"
///
/// [retention]
/// ttl_secs = 600
/// sweep_interval_ms = 1000
///
/// [cache]
/// capacity = 2
/// ```
///
/// # Fields Overview
/// - `storage`: which backend holds the durable rows and where
/// - `retention`: how long a capture lives and how often the sweeper runs
/// - `cache`: how many decoded frames stay in memory
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageSection,
    pub retention: RetentionSection,
    pub cache: CacheSection,
}

impl Config {
    /// Reads a configuration file. Validation is left to the caller, since
    /// command line overrides may still fix an out-of-range value.
    ///
    /// # Errors
    /// `IoError` if the file cannot be read, `TomlError` if it is not valid
    /// TOML for this structure.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let contents = fs::read_to_string(path).map_err(|e| {
            error!("Unable to read configuration file {}: {}", path.display(), e);
            ConfigError::IoError(e)
        })?;
        Self::parse(&contents).map_err(|e| {
            error!("Invalid configuration file {}: {}", path.display(), e);
            e
        })
    }

    /// Parses TOML without validating it.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Loads the file if one is given, otherwise the defaults, then applies
    /// the command line overrides and validates the result.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                info!("No configuration file given, using defaults");
                Self::default()
            }
        };
        let config = config.with_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(ttl_secs) = overrides.ttl_secs {
            self.retention.ttl_secs = ttl_secs;
        }
        if let Some(backend) = overrides.storage_backend {
            self.storage.backend = backend;
        }
        if let Some(path) = &overrides.storage_path {
            self.storage.path = Some(path.clone());
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_TTL_SECS as u64).contains(&self.retention.ttl_secs) {
            return Err(ConfigError::NotInRange(format!(
                "ttl_secs must be within 1..={}, got {}",
                MAX_TTL_SECS, self.retention.ttl_secs
            )));
        }
        let interval = self.retention.sweep_interval_ms;
        if !(MIN_SWEEP_INTERVAL_MS..=MAX_SWEEP_INTERVAL_MS).contains(&interval) {
            return Err(ConfigError::NotInRange(format!(
                "sweep_interval_ms must be within {}..={}, got {}",
                MIN_SWEEP_INTERVAL_MS, MAX_SWEEP_INTERVAL_MS, interval
            )));
        }
        if !(1..=MAX_CACHE_CAPACITY).contains(&self.cache.capacity) {
            return Err(ConfigError::NotInRange(format!(
                "cache capacity must be within 1..={}, got {}",
                MAX_CACHE_CAPACITY, self.cache.capacity
            )));
        }
        if self.storage.backend == StorageBackend::File {
            if let Some(parent) = self.storage.path.as_deref().and_then(Path::parent) {
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    return Err(ConfigError::DirectoryDoesNotExist(parent.display().to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention.ttl_secs.min(MAX_TTL_SECS as u64) as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retention.sweep_interval_ms)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            ttl: self.ttl(),
            cache_capacity: NonZeroUsize::new(self.cache.capacity).unwrap_or(NonZeroUsize::MIN),
        }
    }
}
