//! Feature flag evaluation: overrides, targeting rules, percentage rollouts,
//! weighted variants, and nested segments, plus the cache, rate limiter, and
//! circuit breaker that guard evaluation in a live system.

mod cache;
mod client;
mod context;
mod error;
mod eval;
mod flag;
mod flag_value;
mod hash;
mod ratelimit;
mod resilience;
mod rule;
mod segment;
mod store;
mod test_common;

pub use cache::{CacheStats, LruCache};
pub use client::FlagClient;
pub use context::{ContextBuilder, EvaluationContext};
pub use error::{Error, StorageError};
pub use eval::{evaluate, EvaluationResult, Reason};
pub use flag::{EntityType, Flag, FlagStatus, FlagType, Override, Variant};
pub use flag_value::FlagValue;
pub use hash::murmur3_32;
pub use ratelimit::{RateLimitConfig, RateLimiterStats, TokenBucketRateLimiter};
pub use resilience::{
    Backoff, BreakerError, CircuitBreaker, CircuitBreakerStats, CircuitState, RetryPolicy,
};
pub use rule::{Condition, Op, Rule};
pub use segment::{is_in_segment, Segment};
pub use store::{MemoryStore, Storage};
