//! Bounded retries with exponential backoff around a single remote call

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared::{ApiFailure, CallKind, item_debug, item_warn};
use tokio::time::Instant;

use crate::core::budget::RateBudget;
use crate::error::PipelineResult;
use crate::services::CallTracker;

/// Exponential backoff ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub cap_delay: Duration,
}

impl BackoffPolicy {
    /// Delay before attempt `attempt` (1-based); the first attempt never waits
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.cap_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(10),
        }
    }
}

/// Retry policy applied to every remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Fixed pause after a quota/rate response, outside the backoff ladder
    pub quota_cooldown: Duration,
    /// Quota pauses allowed per call before quota failures count as attempts
    pub max_quota_pauses: u32,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            quota_cooldown: Duration::from_secs(60),
            max_quota_pauses: 5,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// A remote operation driven by [`RetryExecutor`]
#[async_trait]
pub trait RetryableCall: Send {
    type Output: Send;

    fn kind(&self) -> CallKind;

    fn item_id(&self) -> &str;

    fn description(&self) -> String;

    /// Perform attempt number `attempt` (1-based)
    async fn attempt(&mut self, attempt: u32) -> Result<Self::Output, ApiFailure>;

    /// Runs after a failed attempt that will be retried, before the backoff delay
    async fn on_attempt_failed(&mut self, _attempt: u32, _failure: &ApiFailure) -> PipelineResult<()> {
        Ok(())
    }

    /// Switch to the simplified payload for the remaining attempts
    fn degrade(&mut self) {}
}

/// Result of a retried call
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ApiFailure>,
    pub attempts: u32,
    pub quota_pauses: u32,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Drives attempts against the shared budget
#[derive(Clone)]
pub struct RetryExecutor {
    budget: Arc<RateBudget>,
    tracker: CallTracker,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(budget: Arc<RateBudget>, tracker: CallTracker, policy: RetryPolicy) -> Self {
        Self { budget, tracker, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn budget(&self) -> &Arc<RateBudget> {
        &self.budget
    }

    /// Run `call` until it succeeds or the attempt budget is spent
    ///
    /// Only a fatal budget error is returned as `Err`; exhausted retries come
    /// back as an outcome holding the last failure.
    pub async fn execute<C: RetryableCall>(&self, call: &mut C) -> PipelineResult<RetryOutcome<C::Output>> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        let mut quota_pauses = 0;

        loop {
            let lease = self.budget.reserve().await?;
            let started = Instant::now();

            let result = match tokio::time::timeout(self.policy.call_timeout, call.attempt(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ApiFailure::Timeout),
            };
            let elapsed = started.elapsed();

            let failure = match result {
                Ok(value) => {
                    self.tracker.record_success(call.kind(), elapsed).await;
                    if let Some(cooldown) = self.budget.release(lease, true).await {
                        if !cooldown.is_zero() {
                            tokio::time::sleep(cooldown).await;
                        }
                    }
                    item_debug!(
                        call.item_id(),
                        "{} succeeded on attempt {}",
                        call.description(),
                        attempt
                    );
                    return Ok(RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        quota_pauses,
                    });
                }
                Err(failure) => failure,
            };

            self.budget.release(lease, false).await;
            self.tracker.record_failure(call.kind(), &failure, elapsed).await;

            if failure.is_quota() && quota_pauses < self.policy.max_quota_pauses {
                quota_pauses += 1;
                item_warn!(
                    call.item_id(),
                    "{} hit the service quota, pausing {}s ({}/{})",
                    call.description(),
                    self.policy.quota_cooldown.as_secs(),
                    quota_pauses,
                    self.policy.max_quota_pauses
                );
                tokio::time::sleep(self.policy.quota_cooldown).await;
                continue;
            }

            if attempt >= max_attempts {
                item_warn!(
                    call.item_id(),
                    "{} exhausted {} attempts: {}",
                    call.description(),
                    attempt,
                    failure
                );
                return Ok(RetryOutcome {
                    result: Err(failure),
                    attempts: attempt,
                    quota_pauses,
                });
            }

            call.on_attempt_failed(attempt, &failure).await?;
            if attempt + 1 == max_attempts {
                call.degrade();
            }

            let delay = self.policy.backoff.delay_before(attempt + 1);
            item_warn!(
                call.item_id(),
                "{} failed (attempt {}/{}): {}, retrying in {}ms",
                call.description(),
                attempt,
                max_attempts,
                failure,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
