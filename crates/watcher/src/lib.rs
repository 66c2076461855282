//! Watches rendered conversation views over CDP and pushes genuinely new
//! messages to the backend queue.
//!
//! The hard part lives in [`observer`]: a per-attach state machine that
//! distinguishes "old message rendered late" from "new message arrived"
//! using only the unstable signals a hydrating chat view gives off. The
//! in-page side ([`collect`]) is a thin reporter; all decisions are made in
//! the host process.

pub mod browser;
pub mod collect;
pub mod error;
pub mod fingerprint;
pub mod observer;
pub mod ordinal;
pub mod reconcile;
pub mod session;

pub use {
    browser::BrowserHandle,
    error::{Error, Result},
    reconcile::Reconciler,
};
