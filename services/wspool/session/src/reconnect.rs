//! Reconnect accounting and pacing.
//!
//! `ReconnectTracker` counts failed reconnect attempts against a budget that
//! can be changed while the session runs. `Backoff` paces attempts with an
//! exponential delay that resets once a connection is established.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Counts failed reconnect attempts against a budget
#[derive(Debug)]
pub struct ReconnectTracker {
    /// Failed attempts since the session last became active
    attempts: AtomicU32,
    /// Attempts allowed before the session is retired
    budget: AtomicU32,
}

impl ReconnectTracker {
    /// Create a tracker with the given budget
    pub fn new(budget: u32) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            budget: AtomicU32::new(budget),
        }
    }

    /// Record a failed attempt; returns the new count and whether the budget is used up
    pub fn record_failure(&self) -> (u32, bool) {
        let attempts = self.attempts.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        let budget = self.budget.load(Ordering::Acquire);
        let exhausted = attempts >= budget;
        if exhausted {
            warn!("Reconnect budget exhausted ({}/{})", attempts, budget);
        } else {
            debug!("Reconnect attempt failed ({}/{})", attempts, budget);
        }
        (attempts, exhausted)
    }

    /// Clear the attempt count after a successful connect
    pub fn record_success(&self) {
        self.attempts.store(0, Ordering::Release);
    }

    /// Failed attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Current budget
    pub fn budget(&self) -> u32 {
        self.budget.load(Ordering::Acquire)
    }

    /// Replace the budget; takes effect at the next failed attempt
    pub fn set_budget(&self, budget: u32) {
        self.budget.store(budget, Ordering::Release);
    }
}

/// Exponential delay between connect attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `initial` and capped at `max`
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
