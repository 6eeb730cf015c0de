//! HTTP client for the Plaasjapie backend, exposed to the sync engine as a `RemoteBackend`.

mod client;
mod error;
pub mod types;

pub use client::BackendClient;
pub use error::{ApiRetryClass, BackendError, Result};
