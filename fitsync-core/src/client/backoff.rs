//! Exponential backoff state for retryable HTTP responses
//!
//! State is per logical request: every `fetch_collection` call starts a fresh
//! sequence, so a rate limit hit on one endpoint never slows the next.

use std::time::Duration;

/// Default seed delay for the first retry.
pub const DEFAULT_SEED: Duration = Duration::from_secs(1);

/// Ceiling on any single delay.
pub const DEFAULT_CAP: Duration = Duration::from_secs(60);

/// Doubling backoff with a cap. Rate-limit responses may override a single
/// delay with the server-supplied `Retry-After`, but the progression still
/// advances underneath.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with(DEFAULT_SEED, DEFAULT_CAP)
    }

    pub fn with(seed: Duration, cap: Duration) -> Self {
        Self { next: seed, cap }
    }

    /// Delay before retrying a 429. Honors `retry_after` when the server sent
    /// one, falling back to the current backoff value.
    pub fn rate_limit_delay(&mut self, retry_after: Option<Duration>) -> Duration {
        let wait = retry_after.unwrap_or(self.next);
        self.advance();
        wait
    }

    /// Delay before retrying a 5xx. `Retry-After` is not honored here.
    pub fn server_error_delay(&mut self) -> Duration {
        let wait = self.next;
        self.advance();
        wait
    }

    fn advance(&mut self) {
        self.next = std::cmp::min(self.next * 2, self.cap);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
