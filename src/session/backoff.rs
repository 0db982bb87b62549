//! Reconnect backoff policy.
//!
//! The delay is a pure function of the failure count so the schedule is
//! testable without a clock: 1s, 2s, 4s, ... capped at [`MAX_DELAY`]. The
//! attempt count is never bounded — a pump that stays dark for hours must
//! resume bridging on its own when it powers back up.

use std::time::Duration;

pub const INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const MAX_DELAY: Duration = Duration::from_secs(300);

/// Delay to wait before retry number `attempt + 1`.
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let secs = 1u64 << attempt.min(9);
    INITIAL_DELAY
        .saturating_mul(secs as u32)
        .min(MAX_DELAY)
}

/// Failure counter carried inside the session state machine.
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    failures: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the next connection attempt. Zero until the first
    /// failure so the startup connect is immediate.
    pub fn current_delay(&self) -> Duration {
        if self.failures == 0 {
            Duration::ZERO
        } else {
            delay_for_attempt(self.failures - 1)
        }
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Called on a successful transition to Ready; the next drop starts the
    /// schedule over from [`INITIAL_DELAY`].
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
