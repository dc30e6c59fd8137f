use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::client::ClientError;
use crate::config::RetrySettings;

/// Point in time by which an invocation must have reported its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: instant }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Outcome of a call that did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError {
    /// Non-transient failure, returned on the attempt that produced it.
    Failed(ClientError),
    /// Transient failures used up the attempt or time budget.
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last: ClientError,
    },
}

/// Bounded exponential backoff for transient cluster failures.
///
/// The delay before retry `n` is `base_delay * multiplier^(n-1)`, capped at
/// `max_delay`, with +/- `jitter` proportional noise. A retry is only
/// scheduled if it can start before both `max_elapsed` and the caller's
/// deadline; otherwise the policy gives up with [`RetryError::Exhausted`]
/// while there is still time to report it.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    max_attempts: u32,
    max_elapsed: Duration,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            multiplier: settings.multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_attempts: settings.max_attempts.max(1),
            max_elapsed: Duration::from_millis(settings.max_elapsed_ms),
            jitter: settings.jitter.clamp(0.0, 0.99),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Un-jittered delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        delay.mul_f64(factor)
    }

    /// Run `call` until it succeeds, fails non-transiently, or the budget is
    /// spent. Each attempt is also bounded by the remaining budget so a hung
    /// request cannot run past the deadline.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        deadline: Deadline,
        mut call: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let started = Instant::now();
        let budget_end = (started + self.max_elapsed).min(deadline.instant());
        let mut attempt: u32 = 0;

        loop {
            let now = Instant::now();
            if now >= budget_end {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    elapsed: now - started,
                    last: ClientError::Transport(format!(
                        "{operation}: no time left before the execution deadline"
                    )),
                });
            }
            attempt += 1;

            let outcome = match tokio::time::timeout(budget_end - now, call()).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Transport(format!(
                    "{operation}: attempt {attempt} cut off at the execution deadline"
                ))),
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(RetryError::Failed(e)),
                Err(e) => e,
            };

            let elapsed = Instant::now() - started;
            if attempt >= self.max_attempts {
                tracing::warn!(operation, attempt, error = %err, "retry attempts exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    elapsed,
                    last: err,
                });
            }

            let delay = self.jittered(self.delay_for(attempt));
            if Instant::now() + delay >= budget_end {
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "next retry would pass the deadline, giving up"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    elapsed,
                    last: err,
                });
            }

            tracing::warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
