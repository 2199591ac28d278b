//! Ephemeral store core module.
//!
//! Ties the durable store, the expiry registry and the decode cache together
//! so that every captured image disappears once its retention window ends,
//! whether the process stayed up or not.
//!
//! Re-exports:
//! - [`EphemeralStore`] and its [`StoreBuilder`].
//! - [`StoreOptions`], [`LiveImages`].
//! - [`spawn_sweeper`] / [`Sweeper`] for hosts that drive periodic sweeps.

pub mod store;
pub mod ticker;
pub mod types;

pub use store::{EphemeralStore, StoreBuilder};
pub use ticker::{spawn_sweeper, Sweeper};
pub use types::{LiveImages, StoreOptions};
