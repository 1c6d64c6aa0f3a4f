//! Retry Policy
//!
//! Decides what the sync loop does after a failed block attempt. The loop
//! always retries the same height; the policy only picks how long to wait,
//! or whether to stop.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{ErrorClass, RelayError};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then retry the same height
    RetryAfter(Duration),
    /// Stop the loop and surface the error
    Halt,
}

/// Strategy consulted by the sync loop on every failed attempt.
pub trait RetryPolicy: Send {
    /// `consecutive_failures` counts this failure, so it starts at 1.
    fn on_failure(&mut self, error: &RelayError, consecutive_failures: u32) -> RetryDecision;

    /// Called after a block has been fully processed.
    fn on_success(&mut self) {}
}

/// Capped exponential backoff for transient errors; halts on fatal ones.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: u32) -> Self {
        Self {
            initial,
            max,
            multiplier,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.multiplier,
        )
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.multiplier
            .checked_pow(exponent)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn on_failure(&mut self, error: &RelayError, consecutive_failures: u32) -> RetryDecision {
        match error.class() {
            ErrorClass::Fatal => RetryDecision::Halt,
            ErrorClass::Transient => RetryDecision::RetryAfter(self.delay_for(consecutive_failures)),
        }
    }
}

/// Retries everything after the same delay and never halts.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RetryPolicy for FixedDelay {
    fn on_failure(&mut self, _error: &RelayError, _consecutive_failures: u32) -> RetryDecision {
        RetryDecision::RetryAfter(self.delay)
    }
}
