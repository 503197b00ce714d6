//! Bounded exponential restart policy.

use std::time::{Duration, Instant};

use crate::error::AgentError;

/// Restart bookkeeping owned by the agent's control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub scheduled_restart: Option<Instant>,
    pub budget: u32,
    pub max_retries: u32,
    pub initial_interval: Duration,
}

/// Outcome of recording an unexpected exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled { at: Instant, delay: Duration },
    /// A restart was already pending; nothing changed.
    AlreadyScheduled,
}

impl RetryState {
    pub fn new(max_retries: u32, initial_interval: Duration) -> Self {
        Self {
            scheduled_restart: None,
            budget: max_retries,
            max_retries,
            initial_interval,
        }
    }

    /// Restore the full budget, e.g. when a new desired config is accepted.
    pub fn reset(&mut self) {
        self.budget = self.max_retries;
    }

    /// Delay for the next restart: `initial * 2^(max_retries - budget)`.
    pub fn next_delay(&self) -> Duration {
        let exponent = self.max_retries.saturating_sub(self.budget).min(31);
        self.initial_interval.saturating_mul(1u32 << exponent)
    }

    /// Record an unexpected exit observed at `now`.
    pub fn on_unexpected_exit(&mut self, now: Instant) -> Result<RetryDecision, AgentError> {
        if self.scheduled_restart.is_some() {
            return Ok(RetryDecision::AlreadyScheduled);
        }
        if self.budget == 0 {
            return Err(AgentError::RetryBudgetExhausted {
                max_retries: self.max_retries,
            });
        }
        let delay = self.next_delay();
        let at = now + delay;
        self.scheduled_restart = Some(at);
        self.budget -= 1;
        Ok(RetryDecision::Scheduled { at, delay })
    }

    pub fn clear_schedule(&mut self) {
        self.scheduled_restart = None;
    }
}
