use serde::{Deserialize, Serialize};

/// Exponential backoff for blueprint and identity requests, measured in
/// ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ticks: u32,
    pub max_delay_ticks: u32,
    /// Requests sent before giving up. Zero disables the limit.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ticks: 4,
            max_delay_ticks: 240,
            max_attempts: 12,
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> u32 {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay_ticks
            .saturating_mul(1 << shift)
            .min(self.max_delay_ticks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Attempt(u32),
    Wait,
    /// Returned once, on the tick the budget runs out.
    GiveUp,
    Idle,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryState {
    attempts: u32,
    wait: u32,
    exhausted: bool,
}

impl RetryState {
    pub fn poll(&mut self, policy: &RetryPolicy) -> RetryDecision {
        if self.exhausted {
            return RetryDecision::Idle;
        }
        if self.wait > 0 {
            self.wait -= 1;
            return RetryDecision::Wait;
        }
        if policy.max_attempts != 0 && self.attempts >= policy.max_attempts {
            self.exhausted = true;
            return RetryDecision::GiveUp;
        }
        self.attempts += 1;
        self.wait = policy.delay_after(self.attempts);
        RetryDecision::Attempt(self.attempts)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
