//! Storage Trait
//!
//! This module defines the `ImageStorage` trait, the durable side of the
//! ephemeral store.
//!
//! Implementors of this trait are responsible for:
//! - Persisting captured images keyed by id (replace on conflict)
//! - Listing every persisted capture at startup
//! - Deleting single captures, expired captures, or everything
//!
//! All methods may block on I/O and return a `Result` to surface storage errors.

use crate::error_handling::types::StorageError;
use crate::storage::types::CapturedImage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The `ImageStorage` trait defines the interface for durable capture backends.
///
/// Calls for unrelated ids may run concurrently; backends serialize internally
/// where they need to.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Persists `image`, replacing any row with the same id.
    async fn insert(&self, image: &CapturedImage) -> Result<(), StorageError>;

    /// Removes the row for `id`. A missing row is not an error.
    async fn delete_by_id(&self, id: Uuid) -> Result<(), StorageError>;

    /// Returns every persisted capture, newest first.
    async fn list_all(&self) -> Result<Vec<CapturedImage>, StorageError>;

    /// Deletes all rows whose `expires_at` is strictly before `now` and
    /// returns how many were removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;

    /// Deletes everything and returns how many rows were removed.
    async fn delete_all(&self) -> Result<usize, StorageError>;
}
