//! Message fingerprinting: the dedup/idempotency key and cursor value.

use sha2::{Digest, Sha256};

use mirrelay_common::types::Fingerprint;

/// Number of hex characters in a fingerprint (first 16 bytes of SHA-256).
const FINGERPRINT_LEN: usize = 32;

/// Derive the fingerprint for a `(source id, native message id)` pair.
///
/// Pure and deterministic: the same pair always yields the same fingerprint,
/// across sessions and restarts. This is what makes the push API idempotent
/// and the cursor meaningful.
#[must_use]
pub fn fingerprint(source_id: &str, native_id: &str) -> Fingerprint {
    let digest = Sha256::digest(format!("{source_id}:{native_id}").as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    Fingerprint(hex)
}
