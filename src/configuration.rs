//! Runtime configuration: a TOML file with command line overrides.

pub mod config;
pub mod types;

pub use config::Config;
pub use types::{ConfigOverrides, StorageBackend};
