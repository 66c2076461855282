//! Shared types and error scaffolding used across all mirrelay crates.

pub mod error;
pub mod types;

pub use error::FromMessage;
