use async_trait::async_trait;
use sentinel::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use sentinel::rate_limit::store::{BruteForceKeys, BruteForceLimits, BruteForceMode};
use sentinel::rate_limit::{
    BruteForceProtectionService, DistributedRateLimiter, KeyResolver, ManualClock, MemoryStore,
    RateLimitKeyStrategy, RateLimitStore, RateLimiterDefinition, StoreError, WindowDefinition,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Memory store that can be switched into a failing state
struct FlakyStore {
    inner: MemoryStore,
    healthy: AtomicBool,
    stalled: AtomicBool,
    calls: AtomicU32,
}

impl FlakyStore {
    fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: MemoryStore::new(clock),
            healthy: AtomicBool::new(true),
            stalled: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("connection reset".to_string()))
        }
    }
}

#[async_trait]
impl RateLimitStore for FlakyStore {
    async fn fixed_window(&self, key: &str, limit: u32, window_ms: u64) -> Result<bool, StoreError> {
        self.enter()?;
        if self.stalled.load(Ordering::SeqCst) {
            sleep(Duration::from_secs(5)).await;
        }
        self.inner.fixed_window(key, limit, window_ms).await
    }

    async fn sliding_window(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        self.enter()?;
        self.inner.sliding_window(key, limit, window_ms, now_ms).await
    }

    async fn brute_force(
        &self,
        keys: &BruteForceKeys,
        limits: BruteForceLimits,
        mode: BruteForceMode,
    ) -> Result<bool, StoreError> {
        self.enter()?;
        self.inner.brute_force(keys, limits, mode).await
    }
}

fn breaker() -> CircuitBreaker {
    CircuitBreaker::new(
        "redis-rate-limiter",
        CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            open_secs: 1,
            half_open_requests: 2,
            call_timeout_ms: 100,
        },
    )
}

fn definition() -> RateLimiterDefinition {
    // Sliding window disabled so each check is exactly one store call
    RateLimiterDefinition::new(
        "login-rate-limiter",
        WindowDefinition::new(2, Duration::from_secs(60), RateLimitKeyStrategy::Ip),
        WindowDefinition::disabled(RateLimitKeyStrategy::IpUsername),
    )
}

struct Fixture {
    store: Arc<FlakyStore>,
    breaker: CircuitBreaker,
    limiter: DistributedRateLimiter,
    brute_force: BruteForceProtectionService,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let store = Arc::new(FlakyStore::new(clock.clone()));
    let breaker = breaker();

    let limiter = DistributedRateLimiter::new(
        store.clone(),
        breaker.clone(),
        KeyResolver::new(),
        clock,
        "authservice",
    );
    let brute_force = BruteForceProtectionService::new(
        store.clone(),
        breaker.clone(),
        BruteForceLimits {
            max_attempts: 3,
            window_ms: 300_000,
            lockout_ms: 900_000,
        },
        "authservice",
    );

    Fixture {
        store,
        breaker,
        limiter,
        brute_force,
    }
}

#[tokio::test]
async fn test_failing_store_opens_breaker_and_fails_open() {
    let f = fixture();
    let metadata = f.limiter.key_resolver().build_metadata("10.0.0.1", "public", "alice");
    f.store.set_healthy(false);

    for _ in 0..2 {
        assert!(f.limiter.allow(&definition(), &metadata).await);
    }
    assert_eq!(f.breaker.state(), CircuitState::Open);
    assert_eq!(f.store.calls(), 2);

    // Open circuit: requests are allowed without touching the store
    for _ in 0..10 {
        assert!(f.limiter.allow(&definition(), &metadata).await);
    }
    assert_eq!(f.store.calls(), 2);

    let metrics = f.breaker.metrics();
    assert_eq!(metrics.circuit_opened_count, 1);
    assert_eq!(metrics.rejected_requests, 10);
}

#[tokio::test]
async fn test_breaker_recovers_and_limits_resume() {
    let f = fixture();
    let metadata = f.limiter.key_resolver().build_metadata("10.0.0.1", "public", "alice");

    f.store.set_healthy(false);
    for _ in 0..2 {
        f.limiter.allow(&definition(), &metadata).await;
    }
    assert_eq!(f.breaker.state(), CircuitState::Open);

    f.store.set_healthy(true);
    sleep(Duration::from_millis(1100)).await;

    // Half-open probe succeeds and closes the circuit
    assert!(f.limiter.allow(&definition(), &metadata).await);
    assert_eq!(f.breaker.state(), CircuitState::Closed);

    assert!(f.limiter.allow(&definition(), &metadata).await);
    assert!(!f.limiter.allow(&definition(), &metadata).await);
}

#[tokio::test]
async fn test_limiter_and_brute_force_share_one_breaker() {
    let f = fixture();
    let metadata = f.limiter.key_resolver().build_metadata("10.0.0.1", "public", "alice");

    f.store.set_healthy(false);
    for _ in 0..2 {
        f.limiter.allow(&definition(), &metadata).await;
    }
    assert_eq!(f.breaker.state(), CircuitState::Open);

    // Store is healthy again, but the shared circuit is still open: the
    // brute-force service must not count failures
    f.store.set_healthy(true);
    let calls = f.store.calls();
    for _ in 0..5 {
        f.brute_force.record_failure("10.0.0.1", "alice").await.unwrap();
    }
    f.brute_force.ensure_allowed("10.0.0.1", "alice").await.unwrap();
    assert_eq!(f.store.calls(), calls);
}

#[tokio::test]
async fn test_half_open_failure_reopens() {
    let f = fixture();
    let metadata = f.limiter.key_resolver().build_metadata("10.0.0.1", "public", "alice");

    f.store.set_healthy(false);
    for _ in 0..2 {
        f.limiter.allow(&definition(), &metadata).await;
    }
    sleep(Duration::from_millis(1100)).await;

    // Probe fails: straight back to open
    assert!(f.limiter.allow(&definition(), &metadata).await);
    assert_eq!(f.breaker.state(), CircuitState::Open);
    assert_eq!(f.breaker.metrics().circuit_opened_count, 2);
}

#[tokio::test]
async fn test_abandoned_checks_do_not_wedge_breaker() {
    let f = fixture();
    let metadata = f.limiter.key_resolver().build_metadata("10.0.0.1", "public", "alice");

    f.store.set_healthy(false);
    for _ in 0..2 {
        f.limiter.allow(&definition(), &metadata).await;
    }
    sleep(Duration::from_millis(1100)).await;

    // Store answers slowly; callers disconnect before the call timeout
    f.store.set_healthy(true);
    f.store.set_stalled(true);
    for _ in 0..2 {
        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), f.limiter.allow(&definition(), &metadata))
                .await;
        assert!(abandoned.is_err());
    }
    assert_eq!(f.breaker.state(), CircuitState::HalfOpen);

    f.store.set_stalled(false);
    assert!(f.limiter.allow(&definition(), &metadata).await);
    assert_eq!(f.breaker.state(), CircuitState::Closed);

    // Enforcement is back
    assert!(f.limiter.allow(&definition(), &metadata).await);
    assert!(!f.limiter.allow(&definition(), &metadata).await);
}
