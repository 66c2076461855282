//! Capped exponential backoff, applied uniformly to transient-external
//! failures.

use std::time::Duration;

use {tokio_util::sync::CancellationToken, tracing::warn};

/// Capped exponential backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// The delay to sleep before the next attempt. Doubles per call, capped.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(1u32 << exp).min(self.cap)
    }

    /// Reset after a success so the next failure starts from the base delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Retry `f` with backoff until it succeeds.
///
/// Transient-external failures are never fatal to the owning loop; every
/// failure is logged and retried after the next backoff delay.
pub async fn forever<T, E, F, Fut>(operation: &str, mut f: F) -> T
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = Backoff::default();
    loop {
        match f().await {
            Ok(value) => return value,
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    operation,
                    error = %e,
                    retry_in_secs = delay.as_secs(),
                    "backend operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            },
        }
    }
}

/// Like [`forever`], but gives up when the token fires. `None` means the
/// operation was abandoned mid-retry; callers must be safe to redo it later.
pub async fn forever_or_cancelled<T, E, F, Fut>(
    operation: &str,
    cancel: &CancellationToken,
    f: F,
) -> Option<T>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    tokio::select! {
        value = forever(operation, f) => Some(value),
        () = cancel.cancelled() => None,
    }
}
