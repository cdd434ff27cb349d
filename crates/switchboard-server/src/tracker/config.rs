//! Request tracker configuration.

use std::time::Duration;

/// What happens to a handler task that misses its deadline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Leave the task running; its late outcome is discarded.
    #[default]
    Detach,
    /// Cancel the task's token and abort it.
    Cancel,
}

/// Extra delay the sweep waits, on top of the timeout, before retrying.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backoff {
    /// Retry as soon as the timeout has elapsed.
    #[default]
    Fixed,
    /// `initial * 2^attempt`, capped at `max`.
    Exponential {
        /// Delay before the first retry.
        initial: Duration,
        /// Upper bound.
        max: Duration,
    },
}

impl Backoff {
    /// Delay before retrying a request currently at `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed => Duration::ZERO,
            Self::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.min(16));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Tunables of a [`RequestTracker`](super::RequestTracker).
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Deadline used when a call gives none.
    pub default_timeout: Duration,
    /// Retry budget: `retry` fails once `attempt` reaches this.
    pub max_attempts: u32,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
    /// Deadline handling.
    pub timeout_policy: TimeoutPolicy,
    /// Retry spacing used by the sweep.
    pub backoff: Backoff,
    /// How long finished requests stay queryable before the sweep evicts
    /// them.
    pub retention: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_attempts: 3,
            sweep_interval: Duration::from_secs(1),
            timeout_policy: TimeoutPolicy::Detach,
            backoff: Backoff::Fixed,
            retention: Duration::from_secs(3600),
        }
    }
}
