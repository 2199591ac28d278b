use std::env;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::db_entities::{self as images, Column, Entity};
use crate::storage::storage_trait::ImageStorage;
use crate::storage::types::{from_millis, to_millis, CapturedImage};

fn into_image(row: images::Model) -> Result<CapturedImage, StorageError> {
    Ok(CapturedImage {
        id: Uuid::parse_str(&row.id).map_err(|_| StorageError::ReadFailed)?,
        image_data: row.image_data.into(),
        captured_at: from_millis(row.captured_at).ok_or(StorageError::ReadFailed)?,
        expires_at: from_millis(row.expires_at).ok_or(StorageError::ReadFailed)?,
    })
}

/// SQLite-backed durable store.
pub struct DatabaseStorage {
    db: DatabaseConnection,
}

impl DatabaseStorage {
    /// Default database filename used in the application's working directory
    const DEFAULT_DB_FILE: &'static str = "ephemera.sqlite3";

    /// Open the database at `EPHEMERA_DB_PATH` if set, otherwise the default
    /// filename in the current working directory.
    pub async fn new() -> Result<Self, StorageError> {
        if let Ok(path) = env::var("EPHEMERA_DB_PATH") {
            info!("Using DatabaseStorage from EPHEMERA_DB_PATH: {}", path);
            return Self::new_file(PathBuf::from(path)).await;
        }
        let cwd = env::current_dir().map_err(|_| StorageError::ConnectionFailed)?;
        Self::new_file(cwd.join(Self::DEFAULT_DB_FILE)).await
    }

    pub async fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create database dir {}: {}", parent.display(), e);
                    StorageError::WriteFailed
                })?;
            }
        }

        let mut opts = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path_ref.display()));
        opts.max_connections(5).sqlx_logging(false);
        let db = Database::connect(opts).await.map_err(|e| {
            error!("Failed to open database {}: {}", path_ref.display(), e);
            StorageError::ConnectionFailed
        })?;

        db.execute_unprepared(
            "CREATE TABLE IF NOT EXISTS captured_images (
                id TEXT PRIMARY KEY,
                image_data BLOB NOT NULL,
                captured_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );",
        )
        .await
        .map_err(|e| {
            error!("Failed to create captured_images table: {}", e);
            StorageError::WriteFailed
        })?;
        db.execute_unprepared(
            "CREATE INDEX IF NOT EXISTS idx_captured_images_expires_at
             ON captured_images(expires_at);",
        )
        .await
        .map_err(|e| {
            error!("Failed to create expires_at index: {}", e);
            StorageError::WriteFailed
        })?;

        info!("DatabaseStorage initialized at {}", path_ref.display());
        Ok(Self { db })
    }
}

#[async_trait]
impl ImageStorage for DatabaseStorage {
    async fn insert(&self, image: &CapturedImage) -> Result<(), StorageError> {
        let row = images::ActiveModel {
            id: Set(image.id.to_string()),
            image_data: Set(image.image_data.to_vec()),
            captured_at: Set(to_millis(image.captured_at)),
            expires_at: Set(to_millis(image.expires_at)),
        };
        Entity::insert(row)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([Column::ImageData, Column::CapturedAt, Column::ExpiresAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to insert image {}: {}", image.id, e);
                StorageError::WriteFailed
            })?;
        debug!("Persisted image {} ({} bytes)", image.id, image.image_data.len());
        Ok(())
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<(), StorageError> {
        let res = Entity::delete_by_id(id.to_string())
            .exec(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to delete image {}: {}", id, e);
                StorageError::WriteFailed
            })?;
        debug!("Deleted image {} (rows affected: {})", id, res.rows_affected);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<CapturedImage>, StorageError> {
        let rows = Entity::find()
            .order_by_desc(Column::CapturedAt)
            .all(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to list images: {}", e);
                StorageError::ReadFailed
            })?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let row_id = row.id.clone();
            match into_image(row) {
                Ok(image) => out.push(image),
                Err(_) => warn!("Skipping unreadable image row {}", row_id),
            }
        }
        Ok(out)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let res = Entity::delete_many()
            .filter(Column::ExpiresAt.lt(to_millis(now)))
            .exec(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to delete expired images: {}", e);
                StorageError::WriteFailed
            })?;
        Ok(res.rows_affected as usize)
    }

    async fn delete_all(&self) -> Result<usize, StorageError> {
        let res = Entity::delete_many().exec(&self.db).await.map_err(|e| {
            error!("Failed to clear images: {}", e);
            StorageError::WriteFailed
        })?;
        info!("Cleared {} image rows", res.rows_affected);
        Ok(res.rows_affected as usize)
    }
}
