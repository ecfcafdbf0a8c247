//! Bounded retry with exponential backoff.
//!
//! One primitive serves step execution (transient errors), status polling
//! (waiting for a resource to become ready) and health probes. Every loop is
//! bounded by an attempt count, an overall time budget, or both.

use std::future::Future;
use std::time::Duration;

use cee_common::{Error, Result};
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Backoff parameters for one retry loop
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 = limited by `budget` only)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Overall time allowed across all attempts
    pub budget: Option<Duration>,
    /// Randomize each delay between 0.5x and 1.5x
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            budget: None,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: attempts.max(1),
            base_delay,
            ..Default::default()
        }
    }

    /// Polling policy: unlimited attempts inside a time budget
    pub fn polling(base_delay: Duration, max_delay: Duration, budget: Duration) -> Self {
        Self {
            max_attempts: 0,
            base_delay,
            max_delay,
            multiplier: 2.0,
            budget: Some(budget),
            jitter: false,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(
            (current.as_secs_f64() * self.multiplier).min(self.max_delay.as_secs_f64()),
        )
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64()))
    }
}

/// Outcome of a retry loop together with the number of attempts it took
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: std::result::Result<T, E>,
    pub attempts: u32,
}

/// Execute an async operation, retrying errors the predicate accepts.
///
/// Non-retryable errors are returned after the attempt that produced them.
/// The last retryable error is returned once attempts or budget run out.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Attempted<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    let mut delay = policy.base_delay;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) => e,
        };

        if !is_retryable(&err) {
            return Attempted {
                result: Err(err),
                attempts: attempt,
            };
        }

        // A policy with neither bound degrades to a single attempt
        let attempts_exhausted = (policy.max_attempts > 0 && attempt >= policy.max_attempts)
            || (policy.max_attempts == 0 && policy.budget.is_none());

        let remaining = policy
            .budget
            .map(|budget| budget.saturating_sub(started.elapsed()));

        if attempts_exhausted || remaining == Some(Duration::ZERO) {
            warn!(
                operation = %operation_name,
                attempt = attempt,
                error = %err,
                "Giving up after retries"
            );
            return Attempted {
                result: Err(err),
                attempts: attempt,
            };
        }

        let mut sleep_for = policy.jittered(delay);
        if let Some(remaining) = remaining {
            sleep_for = sleep_for.min(remaining);
        }

        debug!(
            operation = %operation_name,
            attempt = attempt,
            error = %err,
            delay_ms = sleep_for.as_millis() as u64,
            "Attempt failed, retrying"
        );

        tokio::time::sleep(sleep_for).await;
        delay = policy.next_delay(delay);
    }
}

/// Await a capability-client call; a timeout becomes `TransientUnavailable`
pub async fn call_with_timeout<T, Fut>(timeout: Duration, what: &str, call: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::TransientUnavailable(format!(
            "{} timed out after {}s",
            what,
            timeout.as_secs_f64()
        ))),
    }
}

enum PollMiss {
    /// Not ready yet, or a transient error; carries the last observation
    Pending(String),
    Fatal(Error),
}

impl std::fmt::Display for PollMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollMiss::Pending(state) => write!(f, "pending ({})", state),
            PollMiss::Fatal(e) => write!(f, "{}", e),
        }
    }
}

/// Poll a status until it equals `expected` (case-insensitive).
///
/// A status listed in `failure_states` stops polling at once. Transient
/// errors count as "not ready yet". When the policy runs out the result is
/// `DependencyNotReady`; any other error is returned unchanged.
pub async fn poll_until_status<F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    expected: &str,
    failure_states: &[&str],
    call_timeout: Duration,
    mut fetch_status: F,
) -> Attempted<String, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let outcome = retry_with_backoff(
        policy,
        what,
        |miss: &PollMiss| matches!(miss, PollMiss::Pending(_)),
        || {
            let call = call_with_timeout(call_timeout, what, fetch_status());
            async move {
                match call.await {
                    Ok(status) if status.eq_ignore_ascii_case(expected) => Ok(status),
                    Ok(status)
                        if failure_states
                            .iter()
                            .any(|s| status.eq_ignore_ascii_case(s)) =>
                    {
                        Err(PollMiss::Fatal(Error::DependencyNotReady(format!(
                            "{} entered state '{}'",
                            what, status
                        ))))
                    }
                    Ok(status) => Err(PollMiss::Pending(format!("state '{}'", status))),
                    Err(e) if e.is_transient() => Err(PollMiss::Pending(e.to_string())),
                    Err(e) => Err(PollMiss::Fatal(e)),
                }
            }
        },
    )
    .await;

    let attempts = outcome.attempts;
    let result = outcome.result.map_err(|miss| match miss {
        PollMiss::Pending(last) => Error::DependencyNotReady(format!(
            "{} not {} after {} polls, last seen {}",
            what, expected, attempts, last
        )),
        PollMiss::Fatal(e) => e,
    });

    Attempted { result, attempts }
}
