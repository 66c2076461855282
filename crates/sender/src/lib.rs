//! Independent relay sender: drains the backend's pending queue and delivers
//! each message to the configured Telegram destination.
//!
//! The sender shares nothing with the watcher but the backend; either side
//! can be restarted without the other noticing.

pub mod destination;
pub mod error;
pub mod format;
pub mod sender;

pub use {
    error::{Error, Result},
    sender::RelaySender,
};
