use super::key::KeyResolver;
use super::store::{RateLimitStore, StoreError};
use super::types::{RateLimitKeyStrategy, RateLimitRequestMetadata, RateLimiterDefinition};
use super::window::{Clock, FixedWindowBucketResolver, SlidingWindowResolver};
use crate::circuit_breaker::CircuitBreaker;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cross-instance fixed/sliding window limiter.
///
/// Counters live only in the shared store. Every store round trip goes
/// through the circuit breaker and any store failure is treated as an allow.
#[derive(Clone)]
pub struct DistributedRateLimiter {
    store: Arc<dyn RateLimitStore>,
    breaker: CircuitBreaker,
    keys: KeyResolver,
    fixed_window: FixedWindowBucketResolver,
    sliding_window: SlidingWindowResolver,
    metric_tag: String,
}

impl DistributedRateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        breaker: CircuitBreaker,
        keys: KeyResolver,
        clock: Arc<dyn Clock>,
        metric_tag: impl Into<String>,
    ) -> Self {
        Self {
            store,
            breaker,
            keys,
            fixed_window: FixedWindowBucketResolver::new(clock.clone()),
            sliding_window: SlidingWindowResolver::new(clock),
            metric_tag: metric_tag.into(),
        }
    }

    pub fn key_resolver(&self) -> &KeyResolver {
        &self.keys
    }

    /// Whether a request may proceed under `definition`.
    ///
    /// Both enabled windows are evaluated; the request passes only if both
    /// allow it. A disabled window always allows.
    pub async fn allow(
        &self,
        definition: &RateLimiterDefinition,
        metadata: &RateLimitRequestMetadata,
    ) -> bool {
        let fixed = async {
            let window = definition.fixed_window();
            if !window.is_enabled() {
                return true;
            }
            let base_key = self.base_key(definition.name(), window.key_strategy, metadata);
            self.allow_fixed_window(&base_key, window.limit, window.duration)
                .await
        };

        let sliding = async {
            let window = definition.sliding_window();
            if !window.is_enabled() {
                return true;
            }
            let base_key = self.base_key(definition.name(), window.key_strategy, metadata);
            self.allow_sliding_window(&base_key, window.limit, window.duration)
                .await
        };

        let (fixed_allowed, sliding_allowed) = futures::join!(fixed, sliding);
        let allowed = fixed_allowed && sliding_allowed;

        if !allowed {
            metrics::record_rate_limit_hit(&self.metric_tag);
            warn!(
                limiter = %definition.name(),
                ip = %metadata.ip,
                username = %metadata.username,
                tenant = %metadata.tenant,
                fixed_allowed,
                sliding_allowed,
                "Rate limit triggered"
            );
        }

        allowed
    }

    /// Count one request against the fixed-window bucket of `base_key`
    pub async fn allow_fixed_window(&self, base_key: &str, limit: u32, window: Duration) -> bool {
        let bucket_key = self.fixed_window.resolve_bucket_key(base_key, window);
        let window_ms = duration_ms(window);

        let result = self
            .breaker
            .call(self.store.fixed_window(&bucket_key, limit, window_ms))
            .await
            .map_err(StoreError::from);

        self.verdict_or_allow("fixed_window", &bucket_key, result)
    }

    /// Count one request against the sliding window of `base_key`
    pub async fn allow_sliding_window(&self, base_key: &str, limit: u32, window: Duration) -> bool {
        let sliding_key = self.sliding_window.resolve_key(base_key);
        let now_ms = self.sliding_window.now_millis();
        let window_ms = duration_ms(window);

        let result = self
            .breaker
            .call(
                self.store
                    .sliding_window(&sliding_key, limit, window_ms, now_ms),
            )
            .await
            .map_err(StoreError::from);

        self.verdict_or_allow("sliding_window", &sliding_key, result)
    }

    fn base_key(
        &self,
        limiter: &str,
        strategy: RateLimitKeyStrategy,
        metadata: &RateLimitRequestMetadata,
    ) -> String {
        self.keys.resolve(limiter, strategy, metadata)
    }

    fn verdict_or_allow(
        &self,
        operation: &'static str,
        key: &str,
        result: Result<bool, StoreError>,
    ) -> bool {
        match result {
            Ok(allowed) => {
                debug!(operation, key, allowed, "Window evaluated");
                allowed
            }
            Err(e) => {
                metrics::record_store_fallback(operation);
                warn!(
                    operation,
                    key,
                    error = %e,
                    "Rate limiter store unavailable, allowing request"
                );
                true
            }
        }
    }
}

fn duration_ms(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}
