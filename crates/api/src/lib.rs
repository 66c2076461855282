//! HTTP client for the backend queue/API collaborator.
//!
//! The backend owns channel configuration and message state; this crate only
//! speaks its worker-pull/worker-push surface and applies the shared
//! retry-with-backoff policy for transient failures.

pub mod client;
pub mod error;
pub mod retry;

pub use {
    client::ApiClient,
    error::{Error, Result},
};
