//! Core types used by the ephemeral store.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Duration;

use crate::decode_cache::DEFAULT_CAPACITY;
use crate::storage::types::{CapturedImage, DEFAULT_TTL_SECS};

/// Immutable snapshot of the live list, oldest capture first.
pub type LiveImages = Arc<Vec<CapturedImage>>;

/// Tunables fixed for the lifetime of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Retention window applied to every new capture.
    pub ttl: Duration,
    /// Maximum number of decoded frames kept in memory.
    pub cache_capacity: NonZeroUsize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            cache_capacity: NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN),
        }
    }
}
