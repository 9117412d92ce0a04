use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Error;

/// Limits for evaluation throughput. Per-flag limits apply in addition to
/// the global per-second and per-minute budgets, never instead of them.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_evaluations_per_second: f64,
    pub max_evaluations_per_minute: f64,
    /// Optional per-second limits for individual flag keys.
    pub per_flag_limits: Option<HashMap<String, f64>>,
    /// Each bucket's capacity is its rate times this multiplier, allowing
    /// short bursts above the sustained rate.
    pub burst_multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_evaluations_per_second: 1000.0,
            max_evaluations_per_minute: 50_000.0,
            per_flag_limits: None,
            burst_multiplier: 1.5,
        }
    }
}

/// Counters reported by [TokenBucketRateLimiter::stats].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub rejection_rate: f64,
}

struct TokenBucket {
    tokens: f64,
    /// Refill rate in tokens per second.
    rate: f64,
    capacity: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_second: f64, burst_multiplier: f64) -> Self {
        let capacity = rate_per_second * burst_multiplier;
        TokenBucket {
            tokens: capacity,
            rate: rate_per_second,
            capacity,
            last_refill: Instant::now(),
        }
    }

    /// Buckets refill continuously; the balance is computed lazily from the
    /// time elapsed since the last refill, capped at capacity.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    fn has_token(&self) -> bool {
        self.tokens >= 1.0
    }

    fn consume(&mut self) {
        self.tokens -= 1.0;
    }

    /// Time until one token will be available at the sustained rate.
    fn wait_time(&self) -> Duration {
        if self.has_token() {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
        }
    }
}

struct LimiterInner {
    second: TokenBucket,
    minute: TokenBucket,
    per_flag: HashMap<String, TokenBucket>,
    total_requests: u64,
    rejected_requests: u64,
}

/// Token-bucket rate limiter guarding evaluation throughput.
///
/// An acquisition must pass the global per-second bucket, the global
/// per-minute bucket, and (when configured) the flag's own bucket. Tokens
/// are only consumed when every applicable bucket can pay, so a rejection
/// never drains the others.
pub struct TokenBucketRateLimiter {
    config: RateLimitConfig,
    inner: Mutex<LimiterInner>,
}

impl TokenBucketRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let inner = LimiterInner {
            second: TokenBucket::new(config.max_evaluations_per_second, config.burst_multiplier),
            minute: TokenBucket::new(
                config.max_evaluations_per_minute / 60.0,
                config.burst_multiplier * 60.0,
            ),
            per_flag: HashMap::new(),
            total_requests: 0,
            rejected_requests: 0,
        };
        TokenBucketRateLimiter {
            config,
            inner: Mutex::new(inner),
        }
    }

    /// Attempts to take one evaluation token; on rejection reports which
    /// bucket refused and how long until it would accept.
    pub async fn acquire(&self, flag_key: &str) -> Result<(), Error> {
        match self.try_acquire_internal(flag_key).await {
            Ok(()) => Ok(()),
            Err((scope, retry_after)) => Err(Error::RateLimitExceeded {
                scope,
                retry_after: Some(retry_after),
            }),
        }
    }

    /// Non-raising form of [TokenBucketRateLimiter::acquire].
    pub async fn try_acquire(&self, flag_key: &str) -> bool {
        self.try_acquire_internal(flag_key).await.is_ok()
    }

    /// Repeatedly attempts acquisition, sleeping between attempts, up to
    /// `timeout`. Cooperative and cancellable by dropping the future.
    pub async fn wait_and_acquire(&self, flag_key: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_acquire_internal(flag_key).await {
                Ok(()) => return true,
                Err((_, retry_after)) => {
                    let now = Instant::now();
                    if now + retry_after > deadline {
                        return false;
                    }
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let inner = self.inner.lock().await;
        RateLimiterStats {
            total_requests: inner.total_requests,
            rejected_requests: inner.rejected_requests,
            rejection_rate: if inner.total_requests == 0 {
                0.0
            } else {
                inner.rejected_requests as f64 / inner.total_requests as f64
            },
        }
    }

    async fn try_acquire_internal(&self, flag_key: &str) -> Result<(), (String, Duration)> {
        let mut inner = self.inner.lock().await;
        inner.total_requests += 1;
        let now = Instant::now();

        let flag_rate = self
            .config
            .per_flag_limits
            .as_ref()
            .and_then(|limits| limits.get(flag_key).copied());
        if let Some(rate) = flag_rate {
            let burst = self.config.burst_multiplier;
            inner
                .per_flag
                .entry(flag_key.to_string())
                .or_insert_with(|| TokenBucket::new(rate, burst));
        }

        inner.second.refill(now);
        inner.minute.refill(now);
        if let Some(bucket) = inner.per_flag.get_mut(flag_key) {
            bucket.refill(now);
        }

        let rejection = if !inner.second.has_token() {
            Some(("global".to_string(), inner.second.wait_time()))
        } else if !inner.minute.has_token() {
            Some(("global".to_string(), inner.minute.wait_time()))
        } else {
            match inner.per_flag.get(flag_key) {
                Some(bucket) if !bucket.has_token() => {
                    Some((flag_key.to_string(), bucket.wait_time()))
                }
                _ => None,
            }
        };
        if let Some(rejection) = rejection {
            inner.rejected_requests += 1;
            return Err(rejection);
        }

        inner.second.consume();
        inner.minute.consume();
        if let Some(bucket) = inner.per_flag.get_mut(flag_key) {
            bucket.consume();
        }
        Ok(())
    }
}
