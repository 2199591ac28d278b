//! SeaORM entity model used by the database storage backend.
//!
//! Maps to the `captured_images` table created by `database_storage`.

use sea_orm::entity::prelude::*;

/// Captured images table entity model.
///
/// Timestamps are stored as epoch milliseconds so that expiry comparisons
/// stay plain integer comparisons in SQL.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "captured_images")]
pub struct Model {
    /// UUID as string primary key
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Encoded image bytes
    pub image_data: Vec<u8>,
    /// Capture time, epoch millis
    pub captured_at: i64,
    /// Deadline, epoch millis
    pub expires_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
