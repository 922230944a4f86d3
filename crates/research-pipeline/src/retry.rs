//! Retry policy with backoff, per-attempt timeouts, and circuit breaking
//!
//! Wraps any external-call future factory. Exhausted attempts come back as
//! an error value, never as a panic or an escaping fault, so callers fold
//! the outcome straight into a stage result.

use crate::config::PipelineConfig;
use dashmap::DashMap;
use research_core::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

/// Per-target breaker bookkeeping
#[derive(Debug, Clone, Copy)]
struct BreakerState {
    consecutive_failures: u32,
    first_failure_at: Instant,
    open_until: Option<Instant>,
}

/// Retry policy shared by every stage launch
///
/// Breaker state is keyed by call identity (the stage name at the executor
/// level; finer identities may be used by stages internally). The policy
/// itself is otherwise pure: all it mutates are the failure counters.
#[derive(Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_total_wait: Duration,
    attempt_timeout: Duration,
    failure_threshold: u32,
    window: Duration,
    cooldown: Duration,
    states: DashMap<String, BreakerState>,
}

impl RetryPolicy {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.retry_base_delay,
            max_total_wait: config.retry_max_total_wait,
            attempt_timeout: config.attempt_timeout,
            failure_threshold: config.breaker_failure_threshold,
            window: config.breaker_window,
            cooldown: config.breaker_cooldown,
            states: DashMap::new(),
        }
    }

    /// Run `op` under retry, timeout, and breaker control
    ///
    /// Retries only retryable errors (`Error::is_retryable`), with doubling
    /// backoff bounded by the total-wait budget. The final error is returned
    /// as a value; a success resets the target's breaker.
    pub async fn call<T, F, Fut>(&self, target: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.reject_while_open(target) {
            debug!(target, "breaker open, failing fast");
            return Err(Error::CircuitOpen {
                target: target.to_string(),
            });
        }

        let started = Instant::now();
        let mut last_error = Error::ExternalCall("no attempts made".to_string());

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.backoff(attempt - 1);
                if started.elapsed() + delay > self.max_total_wait {
                    debug!(target, attempt, "backoff budget exhausted");
                    break;
                }
                sleep(delay).await;
            }

            match timeout(self.attempt_timeout, op()).await {
                Ok(Ok(value)) => {
                    self.record_success(target);
                    return Ok(value);
                }
                Ok(Err(error)) => {
                    let retryable = error.is_retryable();
                    warn!(target, attempt, %error, "attempt failed");
                    last_error = error;
                    if !retryable {
                        break;
                    }
                }
                Err(_) => {
                    warn!(target, attempt, "attempt timed out");
                    last_error = Error::ExternalCall(format!(
                        "attempt timed out after {:?}",
                        self.attempt_timeout
                    ));
                }
            }
        }

        self.record_failure(target);
        Err(last_error)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.saturating_pow(attempt)
    }

    /// True while the target's breaker is open. A breaker whose cool-down
    /// has elapsed closes half-way: the counters reset and the call
    /// proceeds normally.
    fn reject_while_open(&self, target: &str) -> bool {
        let Some(mut entry) = self.states.get_mut(target) else {
            return false;
        };
        let Some(open_until) = entry.open_until else {
            return false;
        };
        if Instant::now() < open_until {
            return true;
        }
        entry.open_until = None;
        entry.consecutive_failures = 0;
        false
    }

    fn record_success(&self, target: &str) {
        self.states.remove(target);
    }

    fn record_failure(&self, target: &str) {
        let now = Instant::now();
        let mut entry = self.states.entry(target.to_string()).or_insert(BreakerState {
            consecutive_failures: 0,
            first_failure_at: now,
            open_until: None,
        });

        if now.duration_since(entry.first_failure_at) > self.window {
            entry.consecutive_failures = 0;
            entry.first_failure_at = now;
        }
        entry.consecutive_failures += 1;

        if entry.consecutive_failures >= self.failure_threshold {
            warn!(
                target,
                failures = entry.consecutive_failures,
                "breaker opening"
            );
            entry.open_until = Some(now + self.cooldown);
        }
    }

    /// Whether the target's breaker is currently open (test and telemetry
    /// hook; `call` performs its own check)
    pub fn is_open(&self, target: &str) -> bool {
        self.states
            .get(target)
            .and_then(|s| s.open_until)
            .is_some_and(|until| Instant::now() < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32, threshold: u32) -> RetryPolicy {
        let config = PipelineConfig::builder()
            .max_attempts(max_attempts)
            .retry_base_delay(Duration::from_millis(10))
            .retry_max_total_wait(Duration::from_secs(5))
            .attempt_timeout(Duration::from_millis(500))
            .breaker_failure_threshold(threshold)
            .breaker_window(Duration::from_secs(60))
            .breaker_cooldown(Duration::from_secs(30))
            .build()
            .unwrap();
        RetryPolicy::new(&config)
    }

    type BoxedAttempt = std::pin::Pin<Box<dyn Future<Output = Result<u32>> + Send>>;

    fn flaky(fail_first: u32) -> (Arc<AtomicU32>, impl FnMut() -> BoxedAttempt) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = move || -> BoxedAttempt {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < fail_first {
                    Err(Error::ExternalCall("transient".to_string()))
                } else {
                    Ok(n)
                }
            })
        };
        (calls, op)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = policy(3, 5);
        let (calls, op) = flaky(2);
        let result = policy.call("market-data", op).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_return_last_error() {
        let policy = policy(3, 5);
        let (calls, op) = flaky(100);
        let error = policy.call("market-data", op).await.unwrap_err();
        assert!(matches!(error, Error::ExternalCall(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_short_circuits() {
        let policy = policy(3, 5);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let error = policy
            .call("market-data", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::InvalidSymbol("???".to_string())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidSymbol(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_attempt_timeout_is_a_failure() {
        let policy = policy(2, 5);
        let error = policy
            .call("news", || async {
                sleep(Duration::from_secs(3600)).await;
                Ok::<(), _>(())
            })
            .await
            .unwrap_err();
        assert!(error.to_string().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_and_fails_fast_without_io() {
        let policy = policy(1, 2);
        let (calls, mut op) = flaky(100);

        // Two exhausted calls open the breaker.
        assert!(policy.call("news", &mut op).await.is_err());
        assert!(policy.call("news", &mut op).await.is_err());
        assert!(policy.is_open("news"));
        let attempts_before = calls.load(Ordering::SeqCst);

        // Fast-fail: the operation must not run at all.
        let error = policy.call("news", &mut op).await.unwrap_err();
        assert!(matches!(error, Error::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), attempts_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_reattempts_after_cooldown() {
        let policy = policy(1, 2);
        let (calls, mut op) = flaky(2);

        assert!(policy.call("news", &mut op).await.is_err());
        assert!(policy.call("news", &mut op).await.is_err());
        assert!(policy.is_open("news"));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!policy.is_open("news"));

        // Next call is attempted normally and succeeds, clearing the state.
        let result = policy.call("news", &mut op).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!policy.is_open("news"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let policy = policy(1, 2);

        let (_, mut failing) = flaky(100);
        assert!(policy.call("fundamentals", &mut failing).await.is_err());

        let (_, mut fine) = flaky(0);
        assert!(policy.call("fundamentals", &mut fine).await.is_ok());

        // One more failure is below the threshold again.
        assert!(policy.call("fundamentals", &mut failing).await.is_err());
        assert!(!policy.is_open("fundamentals"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_per_target() {
        let policy = policy(1, 1);
        let (_, mut op) = flaky(100);
        assert!(policy.call("news", &mut op).await.is_err());
        assert!(policy.is_open("news"));
        assert!(!policy.is_open("market-data"));
    }
}
