//! Storage subsystem
//!
//! This module provides the durable record of captured images, the part of
//! the ephemeral store that survives process restarts.
//!
//! Components:
//! - `storage_trait`: the ImageStorage trait defining a uniform API.
//! - `types`: the `CapturedImage` entity shared by every backend.
//! - `database_storage`: ORM-based SQLite implementation using SeaORM.
//! - `file_storage`: filesystem-backed implementation, one file pair per capture.
//! - `memory_storage`: volatile implementation with failure injection.
//! - `db_entities`: SeaORM entity model for the database backend.

pub mod database_storage;
pub mod db_entities;
pub mod file_storage;
pub mod memory_storage;
pub mod storage_trait;
pub mod types;

pub use database_storage::DatabaseStorage;
pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
pub use storage_trait::ImageStorage;
pub use types::{CapturedImage, ImageSummary};
