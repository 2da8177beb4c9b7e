//! retry loop driven by explicit step values.

use crate::context::OpContext;
use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// outcome of one attempt.
#[derive(Debug)]
pub enum Step<T> {
    Done(T),
    /// try again after backing off; the error is reported if the budget runs out.
    Retry(ProviderError),
    Fail(ProviderError),
}

impl<T> Step<T> {
    /// classify a result for the context's operation.
    pub fn from_result(ctx: &OpContext, result: Result<T, ProviderError>) -> Self {
        match result {
            Ok(value) => Step::Done(value),
            Err(err) if err.is_retryable(ctx.operation()) => Step::Retry(err),
            Err(err) => Step::Fail(err),
        }
    }
}

/// exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub factor: u32,
    pub max: Duration,
    /// retries before the last error is reported; `None` retries until the deadline.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 2,
            max: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            next: self.initial,
            attempts: 0,
        }
    }
}

/// running backoff state of one retry loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    next: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// sleep before the next attempt, or hand back `last` once the deadline leaves no room.
    pub async fn wait(&mut self, ctx: &OpContext, last: ProviderError) -> Result<(), ProviderError> {
        ctx.check_cancelled()?;
        let remaining = ctx.remaining();
        let exhausted = self
            .policy
            .max_attempts
            .is_some_and(|max| self.attempts >= max);
        if remaining.is_zero() || exhausted {
            return Err(last);
        }
        let delay = self.next.min(remaining);
        self.attempts += 1;
        debug!(
            op_id = %ctx.op_id(),
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            error = %last,
            "retrying"
        );
        ctx.sleep(delay).await?;
        self.next = (self.next * self.policy.factor).min(self.policy.max);
        Ok(())
    }
}

/// run `attempt` until it is done, fails, or the context's deadline passes.
pub async fn retry<T, F, Fut>(
    ctx: &OpContext,
    policy: RetryPolicy,
    mut attempt: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Step<T>>,
{
    let mut backoff = policy.backoff();
    loop {
        ctx.check_cancelled()?;
        match attempt().await {
            Step::Done(value) => return Ok(value),
            Step::Fail(err) => return Err(err),
            Step::Retry(err) => backoff.wait(ctx, err).await?,
        }
    }
}
