//! Bounded polling with backoff until a probe reports a target state.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::remote::RemoteError;

const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Timing of a wait: first probe after `initial_delay`, then intervals
/// doubling from `min_interval` up to `max_interval`, all within `timeout`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Pause before the first probe.
    pub initial_delay: Duration,
    /// First pause between probes.
    pub min_interval: Duration,
    /// Largest pause between probes.
    pub max_interval: Duration,
    /// Overall deadline measured from the start of the wait.
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            min_interval: DEFAULT_MIN_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl WaitPolicy {
    /// Overrides the overall deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the pause before the first probe.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Overrides the interval bounds.
    #[must_use]
    pub const fn with_intervals(mut self, min: Duration, max: Duration) -> Self {
        self.min_interval = min;
        self.max_interval = max;
        self
    }

    /// Interval following `current`: doubled, never below the floor and
    /// never above the ceiling.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .max(self.min_interval)
            .min(self.max_interval.max(self.min_interval))
    }
}

/// Successful end of a wait.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome {
    /// The probe reported one of the target states.
    Converged(String),
    /// The resource disappeared and the caller accepted that as success.
    Vanished,
}

/// Failed end of a wait.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// The probe failed; probe errors are never retried.
    #[error("failed to query state: {source}")]
    Probe {
        /// Error returned by the probe.
        #[source]
        source: RemoteError,
    },
    /// The deadline passed without reaching a target state.
    #[error("no target state reached within {}", humantime::format_duration(*.waited))]
    TimedOut {
        /// Time spent waiting.
        waited: Duration,
        /// Last state observed, if the probe ever answered.
        last_state: Option<String>,
    },
    /// The wait was cancelled from outside.
    #[error("wait cancelled after {}", humantime::format_duration(*.waited))]
    Cancelled {
        /// Time spent waiting.
        waited: Duration,
    },
}

impl WaitError {
    /// True for deadline and cancellation outcomes.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Cancelled { .. })
    }
}

/// Polls a probe until it reports a target state.
#[derive(Clone, Debug, Default)]
pub struct Waiter {
    policy: WaitPolicy,
    cancel: CancellationToken,
}

impl Waiter {
    /// Creates a waiter with its own, never-cancelled token.
    #[must_use]
    pub fn new(policy: WaitPolicy) -> Self {
        Self {
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Binds the waiter to an external cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Token observed by every wait.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Polls `probe` until it returns a state in `targets`.
    ///
    /// A not-found probe error ends the wait with [`PollOutcome::Vanished`]
    /// when `vanish_ok` is set. Any other probe error ends it immediately.
    /// A probe still running when the deadline plus one interval passes is
    /// abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Probe`], [`WaitError::TimedOut`] or
    /// [`WaitError::Cancelled`].
    pub async fn wait<F, Fut>(
        &self,
        targets: &[&str],
        vanish_ok: bool,
        mut probe: F,
    ) -> Result<PollOutcome, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, RemoteError>>,
    {
        let started = Instant::now();
        let deadline = started + self.policy.timeout;
        let mut interval = self.policy.min_interval;
        let mut last_state = None;
        let mut attempt = 0_u32;

        self.pause(self.policy.initial_delay.min(self.policy.timeout), started)
            .await?;

        loop {
            attempt = attempt.saturating_add(1);
            let cutoff = deadline + interval;
            let probed = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(WaitError::Cancelled { waited: started.elapsed() });
                }
                result = probe() => result,
                () = sleep_until(cutoff) => {
                    return Err(WaitError::TimedOut { waited: started.elapsed(), last_state });
                }
            };

            match probed {
                Ok(state) if targets.contains(&state.as_str()) => {
                    debug!(attempt, state = %state, "target state reached");
                    return Ok(PollOutcome::Converged(state));
                }
                Ok(state) => {
                    debug!(attempt, state = %state, "waiting for target state");
                    last_state = Some(state);
                }
                Err(err) if vanish_ok && err.is_not_found() => {
                    debug!(attempt, "resource vanished");
                    return Ok(PollOutcome::Vanished);
                }
                Err(source) => return Err(WaitError::Probe { source }),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::TimedOut {
                    waited: now - started,
                    last_state,
                });
            }
            self.pause(interval.min(deadline - now), started).await?;
            interval = self.policy.next_interval(interval);
        }
    }

    async fn pause(&self, duration: Duration, started: Instant) -> Result<(), WaitError> {
        if duration.is_zero() {
            return if self.cancel.is_cancelled() {
                Err(WaitError::Cancelled {
                    waited: started.elapsed(),
                })
            } else {
                Ok(())
            };
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(WaitError::Cancelled { waited: started.elapsed() }),
            () = sleep(duration) => Ok(()),
        }
    }
}
