//! wait for a remote object to reach a target state.

use crate::context::OpContext;
use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const FIRST_INTERVAL: Duration = Duration::from_millis(100);
const MAX_INTERVAL: Duration = Duration::from_secs(10);
const NOT_FOUND_CHECKS: u32 = 20;

/// object and status string returned by a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Observed<T> {
    pub object: T,
    pub state: String,
}

impl<T> Observed<T> {
    pub fn new(object: T, state: impl Into<String>) -> Self {
        Self {
            object,
            state: state.into(),
        }
    }
}

/// polling plan for [`WaitForState::wait`].
#[derive(Debug, Clone)]
pub struct WaitForState {
    pending: Vec<String>,
    target: Vec<String>,
    delay: Duration,
    min_timeout: Duration,
    timeout: Duration,
    poll_interval: Option<Duration>,
    not_found_checks: u32,
}

impl WaitForState {
    /// plan that waits up to `timeout` for one of `target`, tolerating `pending` on the way.
    pub fn new(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        debug_assert!(
            pending.iter().all(|state| !target.contains(state)),
            "pending and target states overlap: {pending:?} / {target:?}"
        );
        Self {
            pending: pending.iter().map(|state| state.to_string()).collect(),
            target: target.iter().map(|state| state.to_string()).collect(),
            delay: Duration::ZERO,
            min_timeout: Duration::ZERO,
            timeout,
            poll_interval: None,
            not_found_checks: NOT_FOUND_CHECKS,
        }
    }

    /// wait this long before the first refresh.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// lower bound for the growing interval between refreshes.
    pub fn min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    /// fixed interval between refreshes.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    fn target_label(&self) -> String {
        self.target.join(", ")
    }

    fn next_interval(&self, current: Duration) -> Duration {
        match self.poll_interval {
            Some(interval) => interval,
            None => current.max(self.min_timeout),
        }
    }

    /// poll `refresh` until it reports a target state.
    ///
    /// `refresh` yields `None` when the object cannot be found. a state that
    /// is neither pending nor target ends the wait immediately.
    pub async fn wait<T, F, Fut>(&self, ctx: &OpContext, mut refresh: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<Observed<T>>, ProviderError>>,
    {
        let started = Instant::now();
        let deadline = if self.timeout.is_zero() {
            ctx.deadline()
        } else {
            (started + self.timeout).min(ctx.deadline())
        };
        let timed_out = |last_state: Option<String>| ProviderError::PollTimeout {
            target: self.target_label(),
            last_state,
            timeout: deadline.saturating_duration_since(started),
        };

        if !self.delay.is_zero() {
            ctx.sleep(self.delay.min(deadline.saturating_duration_since(started)))
                .await?;
        }

        let mut interval = FIRST_INTERVAL;
        let mut not_found = 0u32;
        let mut last_state: Option<String> = None;
        loop {
            ctx.check_cancelled()?;
            // a refresh still in flight at the deadline counts as a poll timeout
            let refreshed = match tokio::time::timeout_at(deadline, refresh()).await {
                Ok(refreshed) => refreshed,
                Err(_) => return Err(timed_out(last_state)),
            };
            match refreshed {
                Ok(Some(observed)) => {
                    not_found = 0;
                    if self.target.contains(&observed.state) {
                        debug!(op_id = %ctx.op_id(), state = %observed.state, "reached target state");
                        return Ok(observed.object);
                    }
                    if !self.pending.contains(&observed.state) {
                        return Err(ProviderError::UnexpectedState {
                            state: observed.state,
                            target: self.target_label(),
                        });
                    }
                    debug!(op_id = %ctx.op_id(), state = %observed.state, "still pending");
                    last_state = Some(observed.state);
                }
                Ok(None) => {
                    not_found += 1;
                    if not_found > self.not_found_checks {
                        return Err(ProviderError::Vanished {
                            what: format!("object awaited for state {}", self.target_label()),
                            checks: not_found,
                        });
                    }
                }
                Err(err) if err.is_retryable(ctx.operation()) => {
                    debug!(op_id = %ctx.op_id(), error = %err, "refresh failed, will retry");
                }
                Err(err) => return Err(err),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out(last_state));
            }
            let sleep = self.next_interval(interval).min(remaining);
            ctx.sleep(sleep).await?;
            interval = (interval * 2).min(MAX_INTERVAL);
        }
    }
}
