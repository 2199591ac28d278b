use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::ImageStorage;
use crate::storage::types::CapturedImage;

/// Process-local store: nothing survives a restart.
///
/// Selected with `backend = "memory"` for fully volatile operation. Writes can
/// be made to fail on demand, which is how the store's error paths are
/// exercised.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    rows: Mutex<HashMap<Uuid, CapturedImage>>,
    fail_inserts: AtomicBool,
    fail_deletes: AtomicBool,
    delete_calls: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `insert` fail with `WriteFailed`.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent delete operation fail with `WriteFailed`.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of delete operations attempted, failed ones included.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CapturedImage>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_delete(&self) -> Result<(), StorageError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed);
        }
        Ok(())
    }
}

#[async_trait]
impl ImageStorage for MemoryStorage {
    async fn insert(&self, image: &CapturedImage) -> Result<(), StorageError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed);
        }
        self.lock().insert(image.id, image.clone());
        Ok(())
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<(), StorageError> {
        self.check_delete()?;
        self.lock().remove(&id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<CapturedImage>, StorageError> {
        let mut images: Vec<CapturedImage> = self.lock().values().cloned().collect();
        images.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        Ok(images)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        self.check_delete()?;
        let mut rows = self.lock();
        let before = rows.len();
        rows.retain(|_, image| image.expires_at >= now);
        let removed = before - rows.len();
        debug!("MemoryStorage dropped {} expired rows", removed);
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<usize, StorageError> {
        self.check_delete()?;
        let mut rows = self.lock();
        let removed = rows.len();
        rows.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_memory_storage_contract() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let old = CapturedImage::new(vec![1], now - Duration::seconds(20), Duration::seconds(10));
        let new = CapturedImage::new(vec![2], now, Duration::seconds(10));
        assert_ok!(storage.insert(&old).await);
        assert_ok!(storage.insert(&new).await);

        assert_eq!(storage.list_all().await.unwrap(), vec![new.clone(), old.clone()]);
        assert_eq!(storage.delete_expired(now).await.unwrap(), 1);
        assert!(!storage.contains(old.id));
        assert_eq!(storage.delete_all().await.unwrap(), 1);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_memory_storage_failure_injection() {
        let storage = MemoryStorage::new();
        let img = CapturedImage::new(vec![1], Utc::now(), Duration::seconds(10));

        storage.fail_inserts(true);
        assert_eq!(storage.insert(&img).await, Err(StorageError::WriteFailed));
        assert!(storage.is_empty());
        storage.fail_inserts(false);
        assert_ok!(storage.insert(&img).await);

        storage.fail_deletes(true);
        assert_err!(storage.delete_by_id(img.id).await);
        assert!(storage.contains(img.id));
        assert_eq!(storage.delete_calls(), 1);
    }
}
