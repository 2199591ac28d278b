//! Command line front end: builds the configured backend, starts the store
//! and runs one command against it.

pub mod controller_handler;
pub mod types;

pub use controller_handler::Controller;
pub use types::Command;
