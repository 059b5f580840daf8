//! Exponential backoff as an explicit per-delivery state value.

use crate::config::RetryConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Retry state of one batch on one backend.
///
/// Delays grow as `initial_delay * multiplier^n`, capped at `max_delay`, and
/// never shrink. A server `Retry-After` hint can raise a delay up to
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct ExportAttempt {
    /// Batch being delivered.
    pub batch_id: u64,
    attempt: u32,
    next_delay: Duration,
    last_delay: Duration,
    started: Instant,
    policy: RetryConfig,
}

impl ExportAttempt {
    /// State before the first attempt.
    #[must_use]
    pub fn new(batch_id: u64, policy: &RetryConfig) -> Self {
        Self {
            batch_id,
            attempt: 1,
            next_delay: policy.initial_delay.min(policy.max_delay),
            last_delay: Duration::ZERO,
            started: Instant::now(),
            policy: policy.clone(),
        }
    }

    /// Number of the attempt in progress, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Time since the first attempt.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Registers a failed attempt and returns the delay before the next one,
    /// or `None` when the batch should be given up.
    pub fn backoff(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let mut delay = self.next_delay.max(self.last_delay);
        if let Some(hint) = retry_after {
            delay = delay.max(hint.min(self.policy.max_delay));
        }
        if self.started.elapsed() + delay > self.policy.max_elapsed_time {
            return None;
        }

        let grown = self.next_delay.as_secs_f64() * self.policy.multiplier;
        self.next_delay = Duration::try_from_secs_f64(grown)
            .unwrap_or(self.policy.max_delay)
            .min(self.policy.max_delay);
        self.last_delay = delay;
        self.attempt += 1;
        Some(delay)
    }
}
