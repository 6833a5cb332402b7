use super::key::sanitize;
use super::store::{BruteForceKeys, BruteForceLimits, BruteForceMode, RateLimitStore, StoreError};
use crate::circuit_breaker::CircuitBreaker;
use crate::error::{Result, ServiceError};
use crate::metrics;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lockout counter keyed by the ip/username pair.
///
/// `ensure_allowed` before authenticating, `record_failure` on bad
/// credentials and `reset` on success. Reaching the failure threshold locks
/// the pair until the lockout expires or a successful login resets it.
#[derive(Clone)]
pub struct BruteForceProtectionService {
    store: Arc<dyn RateLimitStore>,
    breaker: CircuitBreaker,
    limits: BruteForceLimits,
    metric_tag: String,
}

impl BruteForceProtectionService {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        breaker: CircuitBreaker,
        limits: BruteForceLimits,
        metric_tag: impl Into<String>,
    ) -> Self {
        Self {
            store,
            breaker,
            limits,
            metric_tag: metric_tag.into(),
        }
    }

    /// Fails with [`ServiceError::LockedOut`] while the pair is locked.
    /// Never touches the attempts counter.
    pub async fn ensure_allowed(&self, ip: &str, username: &str) -> Result<()> {
        if self.execute(ip, username, BruteForceMode::Check).await {
            Ok(())
        } else {
            Err(self.locked_out(ip, username, BruteForceMode::Check))
        }
    }

    /// Count a failed attempt. The call that reaches the threshold is itself
    /// rejected with [`ServiceError::LockedOut`].
    pub async fn record_failure(&self, ip: &str, username: &str) -> Result<()> {
        if self.execute(ip, username, BruteForceMode::Fail).await {
            Ok(())
        } else {
            Err(self.locked_out(ip, username, BruteForceMode::Fail))
        }
    }

    /// Clear attempts and lock. A no-op for a pair with no state.
    pub async fn reset(&self, ip: &str, username: &str) {
        self.execute(ip, username, BruteForceMode::Reset).await;
    }

    fn locked_out(&self, ip: &str, username: &str, mode: BruteForceMode) -> ServiceError {
        metrics::record_brute_force_lockout(&self.metric_tag);
        warn!(ip, username, mode = mode.as_str(), "Brute-force lockout enforced");
        ServiceError::LockedOut
    }

    async fn execute(&self, ip: &str, username: &str, mode: BruteForceMode) -> bool {
        let keys = keys_for(ip, username);

        let result = self
            .breaker
            .call(self.store.brute_force(&keys, self.limits, mode))
            .await
            .map_err(StoreError::from);

        match result {
            Ok(allowed) => {
                debug!(attempts_key = %keys.attempts, mode = mode.as_str(), allowed, "Brute-force check");
                allowed
            }
            Err(e) => {
                metrics::record_store_fallback("brute_force");
                warn!(
                    attempts_key = %keys.attempts,
                    mode = mode.as_str(),
                    error = %e,
                    "Brute-force store unavailable, allowing request"
                );
                true
            }
        }
    }
}

/// Store keys for an ip/username pair.
///
/// The composite sits inside `{}` so both keys hash to one Redis Cluster slot.
pub fn keys_for(ip: &str, username: &str) -> BruteForceKeys {
    let composite = format!("{}:{}", sanitize(ip), sanitize(username));
    BruteForceKeys {
        attempts: format!("security:bf:{{{}}}:attempts", composite),
        lock: format!("security:bf:{{{}}}:lock", composite),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::rate_limit::memory::MemoryStore;
    use crate::rate_limit::service::tests::{fast_breaker, FailingStore, HangingStore};
    use crate::rate_limit::window::ManualClock;
    use std::time::Duration;

    const LIMITS: BruteForceLimits = BruteForceLimits {
        max_attempts: 3,
        window_ms: 300_000,
        lockout_ms: 900_000,
    };

    fn service() -> (BruteForceProtectionService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let breaker = CircuitBreaker::new("test-store", CircuitBreakerConfig::default());
        (
            BruteForceProtectionService::new(store, breaker, LIMITS, "authservice"),
            clock,
        )
    }

    #[test]
    fn test_keys_share_hash_tag() {
        let keys = keys_for(" 10.0.0.1 ", "Alice");
        assert_eq!(keys.attempts, "security:bf:{10.0.0.1:alice}:attempts");
        assert_eq!(keys.lock, "security:bf:{10.0.0.1:alice}:lock");
    }

    #[tokio::test]
    async fn test_locks_after_threshold() {
        let (service, _clock) = service();

        service.ensure_allowed("10.0.0.1", "alice").await.unwrap();
        service.record_failure("10.0.0.1", "alice").await.unwrap();
        service.record_failure("10.0.0.1", "alice").await.unwrap();

        let third = service.record_failure("10.0.0.1", "alice").await;
        assert!(matches!(third, Err(ServiceError::LockedOut)));

        assert!(matches!(
            service.ensure_allowed("10.0.0.1", "alice").await,
            Err(ServiceError::LockedOut)
        ));
        assert!(matches!(
            service.record_failure("10.0.0.1", "alice").await,
            Err(ServiceError::LockedOut)
        ));
    }

    #[tokio::test]
    async fn test_check_does_not_count_attempts() {
        let (service, _clock) = service();
        for _ in 0..10 {
            service.ensure_allowed("10.0.0.1", "alice").await.unwrap();
        }
        service.record_failure("10.0.0.1", "alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_unlocks_immediately() {
        let (service, _clock) = service();
        for _ in 0..3 {
            let _ = service.record_failure("10.0.0.1", "alice").await;
        }
        assert!(service.ensure_allowed("10.0.0.1", "alice").await.is_err());

        service.reset("10.0.0.1", "alice").await;
        service.ensure_allowed("10.0.0.1", "alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_on_clean_identity_is_noop() {
        let (service, _clock) = service();
        service.reset("10.0.0.1", "nobody").await;
        service.reset("10.0.0.1", "nobody").await;
        service.ensure_allowed("10.0.0.1", "nobody").await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_expires() {
        let (service, clock) = service();
        for _ in 0..3 {
            let _ = service.record_failure("10.0.0.1", "alice").await;
        }

        clock.advance(Duration::from_millis(LIMITS.lockout_ms - 1));
        assert!(service.ensure_allowed("10.0.0.1", "alice").await.is_err());

        clock.advance(Duration::from_millis(1));
        service.ensure_allowed("10.0.0.1", "alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_pairs_are_independent() {
        let (service, _clock) = service();
        for _ in 0..3 {
            let _ = service.record_failure("10.0.0.1", "alice").await;
        }

        service.ensure_allowed("10.0.0.2", "alice").await.unwrap();
        service.ensure_allowed("10.0.0.1", "bob").await.unwrap();
        // Case noise maps onto the locked pair
        assert!(service.ensure_allowed("10.0.0.1", " ALICE").await.is_err());
    }

    #[tokio::test]
    async fn test_fails_open_when_store_errors() {
        let service =
            BruteForceProtectionService::new(Arc::new(FailingStore), fast_breaker(), LIMITS, "authservice");

        for _ in 0..10 {
            service.record_failure("10.0.0.1", "alice").await.unwrap();
        }
        service.ensure_allowed("10.0.0.1", "alice").await.unwrap();
        service.reset("10.0.0.1", "alice").await;
    }

    #[tokio::test]
    async fn test_fails_open_when_store_hangs() {
        let service =
            BruteForceProtectionService::new(Arc::new(HangingStore), fast_breaker(), LIMITS, "authservice");

        let started = std::time::Instant::now();
        service.ensure_allowed("10.0.0.1", "alice").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
