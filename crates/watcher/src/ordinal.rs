//! Ordinal decoding: recovering a monotonic message ordinal from a
//! source-native node identifier.
//!
//! The heuristic is inherently fragile against UI changes in the watched
//! system, so it sits behind a trait the state machine never looks through.

/// Decode a monotonic ordinal from a source-native message identifier.
pub trait OrdinalStrategy: Send + Sync {
    fn decode(&self, native_id: &str) -> Option<u64>;
}

/// Minimum digits for a numeric token to qualify as a message ordinal.
///
/// Snowflake-style message ids are 17-19 digits; shorter runs are assumed to
/// be incidental numerics (indexes, channel fragments, style hashes).
const MIN_ORDINAL_DIGITS: usize = 15;

/// Default strategy: the most significant sufficiently-long numeric token.
///
/// "Most significant" means the longest run of digits; when two runs tie in
/// length the later one wins, because composite ids like
/// `chat-messages-{channel}-{message}` put the message id last.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongestNumericToken;

impl OrdinalStrategy for LongestNumericToken {
    fn decode(&self, native_id: &str) -> Option<u64> {
        let mut best: Option<&str> = None;
        let mut start = None;

        let bytes = native_id.as_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if b.is_ascii_digit() {
                start.get_or_insert(i);
            } else if let Some(s) = start.take() {
                best = pick(best, &native_id[s..i]);
            }
        }
        if let Some(s) = start {
            best = pick(best, &native_id[s..]);
        }

        best.and_then(|token| token.parse().ok())
    }
}

fn pick<'a>(best: Option<&'a str>, candidate: &'a str) -> Option<&'a str> {
    if candidate.len() < MIN_ORDINAL_DIGITS {
        return best;
    }
    match best {
        // Later token wins ties.
        Some(b) if b.len() > candidate.len() => Some(b),
        _ => Some(candidate),
    }
}
