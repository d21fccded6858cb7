//! Reconnect policy for the chat socket.
//!
//! DESIGN
//! ======
//! Linear backoff: the Nth retry after an unexpected closure waits
//! `base_delay * N`, optionally plus uniform jitter. After `max_attempts`
//! retries without a successful open the socket gives up. A successful open
//! resets the counter.
//!
//! `Backoff` is a plain state machine with no timers of its own; the socket
//! task asks it what to do and does the sleeping.

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Tunables for reconnect scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
    /// Upper bound of the random delay added to each retry. Zero disables jitter.
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter: Duration::ZERO,
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic delay before retry `attempt` (1-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter.is_zero() {
            return delay;
        }
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        delay.saturating_add(Duration::from_millis(rand::rng().random_range(0..=max_ms)))
    }
}

/// What the socket should do after an unexpected closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Sleep for `delay`, then make retry number `attempt`.
    After { attempt: u32, delay: Duration },
    /// Every allowed retry has been spent.
    Exhausted { attempts: u32 },
}

/// Attempt counter driven by connection lifecycle signals.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Record an unexpected closure (or failed connect) and decide whether
    /// to retry.
    pub fn on_unexpected_close(&mut self) -> Retry {
        if self.attempts >= self.policy.max_attempts {
            return Retry::Exhausted { attempts: self.attempts };
        }
        self.attempts += 1;
        Retry::After { attempt: self.attempts, delay: self.policy.jittered(self.attempts) }
    }

    /// Record a successful open.
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}

#[cfg(test)]
#[path = "backoff_test.rs"]
mod tests;
