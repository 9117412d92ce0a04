use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// States of a [CircuitBreaker].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow through; consecutive failures are counted.
    Closed,
    /// Calls are rejected until the recovery timeout has elapsed.
    Open,
    /// Probe calls flow through; one failure reopens the circuit.
    HalfOpen,
}

/// A call rejected or failed under a circuit breaker.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker {name} is open, retry after {retry_after:?}")]
    Open { name: String, retry_after: Duration },
    #[error("{0}")]
    Inner(E),
}

/// Counters reported by [CircuitBreaker::stats].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub times_opened: u64,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    total_calls: u64,
    total_failures: u64,
    times_opened: u64,
}

/// A circuit breaker for storage-bound operations.
///
/// Closed until `failure_threshold` consecutive failures, then open for
/// `recovery_timeout`, then half-open; `success_threshold` consecutive
/// successful probes close it again and any probe failure reopens it.
/// Recovery is evaluated lazily at call time; no timer task runs.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        success_threshold: u32,
        recovery_timeout: Duration,
    ) -> Self {
        CircuitBreaker {
            name: name.into(),
            failure_threshold,
            success_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                total_calls: 0,
                total_failures: 0,
                times_opened: 0,
            }),
        }
    }

    /// Runs `op` under the breaker. While open and within the recovery
    /// timeout, `op` is not invoked and the error carries the remaining
    /// recovery time.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(retry_after) = self.admit().await {
            return Err(BreakerError::Open {
                name: self.name.clone(),
                retry_after,
            });
        }
        match op().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(e) => {
                self.on_failure().await;
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Like [CircuitBreaker::call], but an open circuit yields `fallback()`
    /// instead of an error. Failures from `op` itself still propagate.
    pub async fn call_with_fallback<T, E, F, Fut, FB>(&self, op: F, fallback: FB) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> T,
    {
        match self.call(op).await {
            Ok(value) => Ok(value),
            Err(BreakerError::Open { .. }) => Ok(fallback()),
            Err(BreakerError::Inner(e)) => Err(e),
        }
    }

    pub async fn current_state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Force-closes the circuit and clears its counters.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock().await;
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            times_opened: inner.times_opened,
        }
    }

    /// Returns the remaining recovery time when the call must be rejected,
    /// or None to admit it. Transitions open circuits to half-open once the
    /// recovery timeout has elapsed.
    async fn admit(&self) -> Option<Duration> {
        let mut inner = self.inner.lock().await;
        inner.total_calls += 1;
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| at.elapsed())
                .unwrap_or(Duration::MAX);
            if elapsed < self.recovery_timeout {
                return Some(self.recovery_timeout - elapsed);
            }
            inner.state = CircuitState::HalfOpen;
            inner.consecutive_successes = 0;
        }
        None
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.total_failures += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.times_opened += 1;
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.times_opened += 1;
            }
            CircuitState::Open => {}
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    Linear,
    Exponential,
}

/// Bounded retry with configurable backoff for transient failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Adds a uniform random delay of up to 25% on top of each backoff step
    /// to keep synchronized callers from retrying in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff: Backoff::Exponential,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// The delay to sleep after the given zero-based failed attempt, capped
    /// at `max_delay` before jitter is applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scale = match self.backoff {
            Backoff::Linear => (attempt + 1) as f64,
            Backoff::Exponential => 2_f64.powi(attempt.min(62) as i32),
        };
        let delay = self
            .base_delay
            .mul_f64(scale)
            .min(self.max_delay);
        if self.jitter {
            delay.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..=0.25))
        } else {
            delay
        }
    }

    /// Runs `op`, retrying up to `max_retries` times while `is_retryable`
    /// accepts the error. Non-retryable errors and the final attempt's error
    /// propagate unchanged.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_retries || !is_retryable(&e) {
                        return Err(e);
                    }
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Error)]
    #[error("boom")]
    struct Boom;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("storage", 3, 2, Duration::from_secs(30))
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker.call::<(), _, _, _>(|| async { Err(Boom) }).await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        breaker
            .call::<_, Boom, _, _>(|| async { Ok(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = breaker();
        for _ in 0..2 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.current_state().await, CircuitState::Closed);

        fail(&breaker).await;
        assert_eq!(breaker.current_state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_the_failure_count_while_closed() {
        let breaker = breaker();
        fail(&breaker).await;
        fail(&breaker).await;
        succeed(&breaker).await;
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.current_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_invoking_the_operation() {
        let breaker = breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }

        let invoked = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&invoked);
        let err = breaker
            .call::<(), Boom, _, _>(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        match err {
            BreakerError::Open { name, retry_after } => {
                assert_eq!(name, "storage");
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(30));
            }
            BreakerError::Inner(_) => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn fallback_is_served_while_open() {
        let breaker = breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }

        let value = breaker
            .call_with_fallback::<_, Boom, _, _, _>(|| async { Ok(1) }, || -1)
            .await
            .unwrap();
        assert_eq!(value, -1);
    }

    #[tokio::test]
    async fn operation_failures_still_propagate_under_fallback() {
        let breaker = breaker();
        let err = breaker
            .call_with_fallback::<i32, Boom, _, _, _>(|| async { Err(Boom) }, || -1)
            .await
            .unwrap_err();
        assert_eq!(err, Boom);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_through_half_open_probes() {
        let breaker = breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }

        tokio::time::advance(Duration::from_secs(31)).await;
        succeed(&breaker).await;
        assert_eq!(breaker.current_state().await, CircuitState::HalfOpen);
        succeed(&breaker).await;
        assert_eq!(breaker.current_state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn a_half_open_failure_reopens_immediately() {
        let breaker = breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }

        tokio::time::advance(Duration::from_secs(31)).await;
        fail(&breaker).await;
        assert_eq!(breaker.current_state().await, CircuitState::Open);

        // The recovery window restarts from the reopen.
        tokio::time::advance(Duration::from_secs(15)).await;
        let err = breaker
            .call::<(), Boom, _, _>(|| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, BreakerError::Open { .. }));
    }

    #[tokio::test]
    async fn reset_closes_the_circuit() {
        let breaker = breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }
        breaker.reset().await;
        assert_eq!(breaker.current_state().await, CircuitState::Closed);
        succeed(&breaker).await;
    }

    #[tokio::test]
    async fn stats_count_calls_failures_and_openings() {
        let breaker = breaker();
        succeed(&breaker).await;
        for _ in 0..3 {
            fail(&breaker).await;
        }

        let stats = breaker.stats().await;
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.total_calls, 4);
        assert_eq!(stats.total_failures, 3);
        assert_eq!(stats.times_opened, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_failures() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let value = policy
            .run(
                move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move { if n < 2 { Err(Boom) } else { Ok(42) } }
                },
                |_| true,
            )
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_propagate_immediately() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = policy
            .run::<(), _, _, _, _>(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(Boom) }
                },
                |_| false,
            )
            .await
            .unwrap_err();
        assert_eq!(err, Boom);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = policy
            .run::<(), _, _, _, _>(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(Boom) }
                },
                |_| true,
            )
            .await
            .unwrap_err();
        assert_eq!(err, Boom);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let linear = RetryPolicy {
            backoff: Backoff::Linear,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            ..RetryPolicy::default()
        };
        assert_eq!(linear.delay_for(0), Duration::from_millis(100));
        assert_eq!(linear.delay_for(1), Duration::from_millis(200));
        assert_eq!(linear.delay_for(2), Duration::from_millis(250));

        let exponential = RetryPolicy {
            backoff: Backoff::Exponential,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        assert_eq!(exponential.delay_for(0), Duration::from_millis(100));
        assert_eq!(exponential.delay_for(2), Duration::from_millis(400));
        assert_eq!(exponential.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_delay() {
        let policy = RetryPolicy {
            jitter: true,
            backoff: Backoff::Linear,
            base_delay: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }
}
