pub mod clock;
pub mod configuration;
pub mod controller;
pub mod decode_cache;
pub mod ephemeral_store;
pub mod error_handling;
pub mod expiry;
pub mod storage;

pub use ephemeral_store::{EphemeralStore, StoreBuilder, StoreOptions};
pub use storage::{CapturedImage, ImageStorage};
