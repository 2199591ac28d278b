//! Expiry timers.
//!
//! Per image id the registry moves `Armed -> Fired | Cancelled`, never back.

pub mod registry;
pub mod types;

pub use registry::ExpiryRegistry;
pub use types::ArmOutcome;
