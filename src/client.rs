use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::cache::LruCache;
use crate::error::Error;
use crate::eval::{evaluate, EvaluationResult, Reason};
use crate::flag::{Flag, FlagType};
use crate::ratelimit::{RateLimitConfig, TokenBucketRateLimiter};
use crate::resilience::{BreakerError, CircuitBreaker};
use crate::store::Storage;
use crate::{EvaluationContext, FlagValue};

/// The application-facing flag client.
///
/// Evaluation never raises to the caller: a missing flag serves the supplied
/// default with reason `DEFAULT`, and any failure (storage, rate limiting,
/// an open circuit, a type mismatch) serves the default with reason `ERROR`.
/// Optional layers wire in per instance: a flag cache in front of storage, a
/// rate limiter on evaluations, and a circuit breaker around storage reads.
pub struct FlagClient {
    storage: Arc<dyn Storage>,
    cache: Option<LruCache<Flag>>,
    limiter: Option<TokenBucketRateLimiter>,
    breaker: Option<CircuitBreaker>,
    default_context: Option<EvaluationContext>,
}

impl FlagClient {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        FlagClient {
            storage,
            cache: None,
            limiter: None,
            breaker: None,
            default_context: None,
        }
    }

    /// Caches flag definitions read from storage.
    pub fn with_cache(mut self, max_size: usize, ttl: Option<Duration>) -> Self {
        self.cache = Some(LruCache::new(max_size, ttl));
        self
    }

    pub fn with_rate_limiter(mut self, config: RateLimitConfig) -> Self {
        self.limiter = Some(TokenBucketRateLimiter::new(config));
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Ambient context merged under every call-supplied context. Call-side
    /// fields win; attribute maps are unioned.
    pub fn with_default_context(mut self, context: EvaluationContext) -> Self {
        self.default_context = Some(context);
        self
    }

    /// Boolean convenience accessor, defaulting to disabled.
    pub async fn is_enabled(&self, key: &str, context: &EvaluationContext) -> bool {
        self.bool_value(key, context, false).await
    }

    /// Boolean flags are the common case and a boolean read is accepted from
    /// any flag type; a non-boolean outcome simply falls back to `default`.
    pub async fn bool_value(&self, key: &str, context: &EvaluationContext, default: bool) -> bool {
        match self.resolve(key, context, None).await {
            Ok(result) => result.value.as_bool().unwrap_or(default),
            Err(e) => {
                self.note_failure(key, &e);
                default
            }
        }
    }

    pub async fn string_value(
        &self,
        key: &str,
        context: &EvaluationContext,
        default: &str,
    ) -> String {
        match self.resolve(key, context, Some(FlagType::String)).await {
            Ok(result) => result
                .value
                .as_string()
                .unwrap_or_else(|| default.to_string()),
            Err(e) => {
                self.note_failure(key, &e);
                default.to_string()
            }
        }
    }

    pub async fn number_value(&self, key: &str, context: &EvaluationContext, default: f64) -> f64 {
        match self.resolve(key, context, Some(FlagType::Number)).await {
            Ok(result) => result.value.as_float().unwrap_or(default),
            Err(e) => {
                self.note_failure(key, &e);
                default
            }
        }
    }

    pub async fn json_value(
        &self,
        key: &str,
        context: &EvaluationContext,
        default: serde_json::Value,
    ) -> serde_json::Value {
        match self.resolve(key, context, Some(FlagType::Json)).await {
            Ok(result) => result.value.as_json(),
            Err(e) => {
                self.note_failure(key, &e);
                default
            }
        }
    }

    /// Full evaluation detail for one flag. A missing flag yields `default`
    /// with reason `DEFAULT`; any failure yields `default` with reason
    /// `ERROR`.
    pub async fn evaluate(
        &self,
        key: &str,
        context: &EvaluationContext,
        default: FlagValue,
    ) -> EvaluationResult {
        match self.resolve(key, context, None).await {
            Ok(result) => result,
            Err(Error::FlagNotFound { .. }) => EvaluationResult {
                value: default,
                variant: None,
                reason: Reason::Default,
            },
            Err(e) => {
                self.note_failure(key, &e);
                EvaluationResult {
                    value: default,
                    variant: None,
                    reason: Reason::Error,
                }
            }
        }
    }

    /// Evaluates every active flag. A flag that fails to evaluate degrades
    /// to its static default with reason `ERROR`; a failed listing yields an
    /// empty map.
    pub async fn evaluate_all(
        &self,
        context: &EvaluationContext,
    ) -> HashMap<String, EvaluationResult> {
        let flags = match self.storage.get_all_active_flags().await {
            Ok(flags) => flags,
            Err(e) => {
                warn!("listing active flags failed: {}", e);
                return HashMap::new();
            }
        };

        let merged = self.merged_context(context);
        let mut results = HashMap::with_capacity(flags.len());
        for flag in flags {
            let result = match evaluate(self.storage.as_ref(), &flag, &merged).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("evaluating flag {} failed: {}", flag.key, e);
                    EvaluationResult {
                        value: flag.static_value(),
                        variant: None,
                        reason: Reason::Error,
                    }
                }
            };
            results.insert(flag.key, result);
        }
        results
    }

    /// Storage reachability; false on any error.
    pub async fn health_check(&self) -> bool {
        self.storage.health_check().await.unwrap_or(false)
    }

    async fn resolve(
        &self,
        key: &str,
        context: &EvaluationContext,
        expected: Option<FlagType>,
    ) -> Result<EvaluationResult, Error> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(key).await?;
        }

        let flag = self.fetch_flag(key).await?;
        if let Some(expected) = expected {
            if flag.flag_type != expected {
                return Err(Error::TypeMismatch {
                    key: key.to_string(),
                    requested: type_name(expected),
                    actual: type_name(flag.flag_type),
                });
            }
        }

        let merged = self.merged_context(context);
        evaluate(self.storage.as_ref(), &flag, &merged).await
    }

    async fn fetch_flag(&self, key: &str) -> Result<Flag, Error> {
        if let Some(cache) = &self.cache {
            if let Some(flag) = cache.get(key).await {
                return Ok(flag);
            }
        }

        let fetched = match &self.breaker {
            Some(breaker) => breaker
                .call(|| self.storage.get_flag(key))
                .await
                .map_err(|e| match e {
                    BreakerError::Open { name, retry_after } => Error::CircuitOpen {
                        name,
                        retry_after: Some(retry_after),
                    },
                    BreakerError::Inner(e) => Error::Storage(e),
                })?,
            None => self.storage.get_flag(key).await?,
        };

        match fetched {
            Some(flag) => {
                if let Some(cache) = &self.cache {
                    cache.set(key, flag.clone(), None).await;
                }
                Ok(flag)
            }
            None => Err(Error::FlagNotFound {
                key: key.to_string(),
            }),
        }
    }

    fn merged_context(&self, context: &EvaluationContext) -> EvaluationContext {
        match &self.default_context {
            Some(default) => default.merge(context),
            None => context.clone(),
        }
    }

    fn note_failure(&self, key: &str, error: &Error) {
        if !matches!(error, Error::FlagNotFound { .. }) {
            warn!("evaluation of {} fell back to default: {}", key, error);
        }
    }
}

fn type_name(flag_type: FlagType) -> &'static str {
    match flag_type {
        FlagType::Boolean => "boolean",
        FlagType::String => "string",
        FlagType::Number => "number",
        FlagType::Json => "json",
    }
}
