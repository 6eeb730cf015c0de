//! Domain models, ports and error taxonomy of the Plaasjapie offline sync engine.
//!
//! This crate performs no I/O. Storage, networking and scheduling live in the sibling crates
//! and meet here through the traits in [`ports`].

pub mod cache;
pub mod clock;
pub mod disabled_store;
pub mod errors;
pub mod ports;
pub mod records;
pub mod sync;

pub use disabled_store::DisabledStore;
pub use errors::{Error, Result};
