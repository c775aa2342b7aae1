//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Calculate exponential backoff delay with jitter.
///
/// Attempt 0 never waits. The delay doubles per attempt from `base_ms`,
/// is capped at `max_ms`, and gets up to 10% extra jitter on top.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Tracks consecutive accept failures for the listener loop.
#[derive(Debug)]
pub struct AcceptBackoff {
    failures: u32,
    base_ms: u64,
    max_ms: u64,
}

impl AcceptBackoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { failures: 0, base_ms, max_ms }
    }

    /// Record a failure and return how long to pause before the next accept.
    pub fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        calculate_backoff(self.failures, self.base_ms, self.max_ms)
    }

    pub fn on_success(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self::new(5, 1000)
    }
}
