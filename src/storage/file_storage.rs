use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::ImageStorage;
use crate::storage::types::{from_millis, to_millis, CapturedImage};

const META_EXT: &str = "meta";
const IMAGE_EXT: &str = "img";
const TMP_META_EXT: &str = "meta.tmp";

/// Directory-backed durable store.
///
/// Each capture is two files: `<id>.img` with the encoded bytes and
/// `<id>.meta` with a small key/value header. The header is written last and
/// removed first, so an entry without one is incomplete and is ignored by
/// listings and reclaimed by the next expiry sweep.
pub struct FileStorage {
    base_path: PathBuf,
    // held by writers and sweepers so a sweep never sees a half-written entry
    write_lock: Mutex<()>,
}

struct Meta {
    id: Uuid,
    captured_at: i64,
    expires_at: i64,
    size: usize,
}

impl FileStorage {
    pub async fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            error!("Failed to create storage dir {}: {}", base_path.display(), e);
            StorageError::WriteFailed
        })?;
        info!("FileStorage initialized at {}", base_path.display());
        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    /// Construct FileStorage using env var EPHEMERA_FILE_STORAGE_DIR if set, otherwise current directory.
    pub async fn new_default() -> Result<Self, StorageError> {
        if let Ok(dir) = std::env::var("EPHEMERA_FILE_STORAGE_DIR") {
            info!("Using FileStorage from EPHEMERA_FILE_STORAGE_DIR: {}", dir);
            return Self::new(PathBuf::from(dir)).await;
        }
        let cwd = std::env::current_dir().map_err(|e| {
            error!("Failed to get current dir: {}", e);
            StorageError::ReadFailed
        })?;
        Self::new(cwd).await
    }

    fn meta_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join(format!("{}.{}", id, META_EXT))
    }

    fn tmp_meta_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join(format!("{}.{}", id, TMP_META_EXT))
    }

    fn image_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join(format!("{}.{}", id, IMAGE_EXT))
    }

    fn render_meta(image: &CapturedImage) -> String {
        format!(
            "id: {}\ncaptured_at: {}\nexpires_at: {}\nsize: {}\n",
            image.id,
            to_millis(image.captured_at),
            to_millis(image.expires_at),
            image.image_data.len()
        )
    }

    fn parse_meta(content: &str) -> Option<Meta> {
        let mut map: HashMap<&str, &str> = HashMap::new();
        for line in content.lines() {
            if let Some((k, v)) = line.split_once(": ") {
                map.insert(k.trim(), v.trim());
            }
        }
        Some(Meta {
            id: map.get("id")?.parse().ok()?,
            captured_at: map.get("captured_at")?.parse().ok()?,
            expires_at: map.get("expires_at")?.parse().ok()?,
            size: map.get("size")?.parse().ok()?,
        })
    }

    async fn read_meta(&self, path: &Path) -> Option<Meta> {
        let content = fs::read_to_string(path).await.ok()?;
        Self::parse_meta(&content)
    }

    async fn remove_entry(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut removed = false;
        for path in [self.meta_path(id), self.image_path(id), self.tmp_meta_path(id)] {
            match fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    error!("Failed to remove {}: {}", path.display(), e);
                    return Err(StorageError::WriteFailed);
                }
            }
        }
        Ok(removed)
    }

    /// Ids of every entry in the directory, complete or not.
    async fn entry_ids(&self) -> Result<Vec<(Uuid, bool)>, StorageError> {
        let mut dir = fs::read_dir(&self.base_path).await.map_err(|e| {
            error!("Failed to read storage dir {}: {}", self.base_path.display(), e);
            StorageError::ReadFailed
        })?;
        let mut seen: HashMap<Uuid, bool> = HashMap::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| {
            error!("Dir entry error: {}", e);
            StorageError::ReadFailed
        })? {
            let name = entry.file_name();
            let Some((stem, ext)) = name.to_str().and_then(|n| n.split_once('.')) else {
                continue;
            };
            let Ok(id) = stem.parse::<Uuid>() else {
                continue;
            };
            match ext {
                META_EXT => {
                    seen.insert(id, true);
                }
                // a header that was never committed leaves the entry incomplete
                IMAGE_EXT | TMP_META_EXT => {
                    seen.entry(id).or_insert(false);
                }
                _ => {}
            }
        }
        Ok(seen.into_iter().collect())
    }
}

#[async_trait]
impl ImageStorage for FileStorage {
    async fn insert(&self, image: &CapturedImage) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let image_path = self.image_path(image.id);
        fs::write(&image_path, &image.image_data).await.map_err(|e| {
            error!("Failed to write image file {}: {}", image_path.display(), e);
            StorageError::WriteFailed
        })?;

        let meta_path = self.meta_path(image.id);
        let tmp_path = self.tmp_meta_path(image.id);
        fs::write(&tmp_path, Self::render_meta(image)).await.map_err(|e| {
            error!("Failed to write meta file {}: {}", tmp_path.display(), e);
            StorageError::WriteFailed
        })?;
        fs::rename(&tmp_path, &meta_path).await.map_err(|e| {
            error!("Failed to commit meta file {}: {}", meta_path.display(), e);
            StorageError::WriteFailed
        })?;
        debug!("Saved image {} to {}", image.id, image_path.display());
        Ok(())
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<(), StorageError> {
        if self.remove_entry(id).await? {
            debug!("Removed image {}", id);
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<CapturedImage>, StorageError> {
        let mut images = Vec::new();
        for (id, complete) in self.entry_ids().await? {
            if !complete {
                continue;
            }
            let Some(meta) = self.read_meta(&self.meta_path(id)).await else {
                warn!("Skipping unreadable meta for {}", id);
                continue;
            };
            let data = match fs::read(self.image_path(id)).await {
                Ok(data) if data.len() == meta.size => data,
                Ok(data) => {
                    warn!("Skipping torn image {}: {} of {} bytes", id, data.len(), meta.size);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping image {} without payload: {}", id, e);
                    continue;
                }
            };
            let (Some(captured_at), Some(expires_at)) =
                (from_millis(meta.captured_at), from_millis(meta.expires_at))
            else {
                warn!("Skipping image {} with invalid timestamps", id);
                continue;
            };
            images.push(CapturedImage {
                id: meta.id,
                image_data: data.into(),
                captured_at,
                expires_at,
            });
        }
        images.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        Ok(images)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;
        let cutoff = to_millis(now);
        let mut removed = 0;
        for (id, complete) in self.entry_ids().await? {
            let expired = if complete {
                match self.read_meta(&self.meta_path(id)).await {
                    Some(meta) => meta.expires_at < cutoff,
                    // unreadable header: nothing can prove it is still live
                    None => true,
                }
            } else {
                true
            };
            if expired && self.remove_entry(id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for (id, _) in self.entry_ids().await? {
            if self.remove_entry(id).await? {
                removed += 1;
            }
        }
        info!("Cleared {} image entries from {}", removed, self.base_path.display());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serial_test::serial;
    use tempfile::TempDir;

    fn image_at(captured_at: DateTime<Utc>, ttl_secs: i64) -> CapturedImage {
        CapturedImage::new(vec![1, 2, 3, 4], captured_at, Duration::seconds(ttl_secs))
    }

    #[tokio::test]
    async fn test_fs_insert_list_and_delete() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();
        let now = Utc::now();
        let a = image_at(now - Duration::seconds(5), 600);
        let b = image_at(now, 600);
        storage.insert(&a).await.unwrap();
        storage.insert(&b).await.unwrap();

        assert_eq!(storage.list_all().await.unwrap(), vec![b.clone(), a.clone()]);

        storage.delete_by_id(a.id).await.unwrap();
        storage.delete_by_id(a.id).await.unwrap();
        assert_eq!(storage.list_all().await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_fs_incomplete_entries_are_hidden_and_swept() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();
        let orphan = Uuid::new_v4();
        std::fs::write(dir.path().join(format!("{}.img", orphan)), b"partial").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"unrelated").unwrap();

        assert!(storage.list_all().await.unwrap().is_empty());
        assert_eq!(storage.delete_expired(Utc::now()).await.unwrap(), 1);
        assert!(!dir.path().join(format!("{}.img", orphan)).exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_fs_uncommitted_headers_are_reclaimed() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();
        let crashed = Uuid::new_v4();
        let tmp_only = Uuid::new_v4();
        std::fs::write(dir.path().join(format!("{}.img", crashed)), b"data").unwrap();
        std::fs::write(dir.path().join(format!("{}.meta.tmp", crashed)), b"id: x").unwrap();
        std::fs::write(dir.path().join(format!("{}.meta.tmp", tmp_only)), b"id: y").unwrap();

        assert!(storage.list_all().await.unwrap().is_empty());
        assert_eq!(storage.delete_expired(Utc::now()).await.unwrap(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        std::fs::write(dir.path().join(format!("{}.meta.tmp", tmp_only)), b"id: y").unwrap();
        assert_eq!(storage.delete_all().await.unwrap(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_fs_torn_payload_is_skipped() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();
        let img = image_at(Utc::now(), 600);
        storage.insert(&img).await.unwrap();
        std::fs::write(dir.path().join(format!("{}.img", img.id)), b"x").unwrap();

        assert!(storage.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_delete_expired_and_all() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();
        let now = Utc::now();
        let stale = image_at(now - Duration::seconds(900), 600);
        let fresh = image_at(now, 600);
        storage.insert(&stale).await.unwrap();
        storage.insert(&fresh).await.unwrap();

        assert_eq!(storage.delete_expired(now).await.unwrap(), 1);
        assert_eq!(storage.list_all().await.unwrap(), vec![fresh]);
        assert_eq!(storage.delete_all().await.unwrap(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    #[serial]
    async fn test_fs_new_default_honors_env_dir() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("captures");
        std::env::set_var("EPHEMERA_FILE_STORAGE_DIR", &target);
        let storage = FileStorage::new_default().await;
        std::env::remove_var("EPHEMERA_FILE_STORAGE_DIR");
        assert!(storage.is_ok());
        assert!(target.is_dir());
    }
}
