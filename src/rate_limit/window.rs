use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock source in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;

    fn now_secs(&self) -> u64 {
        self.now_millis() / 1000
    }
}

/// System UTC clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Resolves fixed-window bucket keys.
///
/// The bucket id is `epoch_seconds / window_seconds`, so it changes every
/// window and old buckets are left to expire in the store.
#[derive(Clone)]
pub struct FixedWindowBucketResolver {
    clock: Arc<dyn Clock>,
}

impl FixedWindowBucketResolver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn resolve_bucket_key(&self, base_key: &str, window: Duration) -> String {
        format!("{}:fw:{}", base_key, self.bucket(window))
    }

    fn bucket(&self, window: Duration) -> u64 {
        let seconds = window.as_secs().max(1);
        self.clock.now_secs() / seconds
    }
}

/// Resolves sliding-window keys and the timestamp passed to the script.
///
/// The pruning and counting happen inside the store operation.
#[derive(Clone)]
pub struct SlidingWindowResolver {
    clock: Arc<dyn Clock>,
}

impl SlidingWindowResolver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn resolve_key(&self, base_key: &str) -> String {
        format!("{}:sw", base_key)
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_bucket_is_pure_function_of_time() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let resolver = FixedWindowBucketResolver::new(clock.clone());
        let window = Duration::from_secs(30);

        // 1_700_000_000 / 30 = 56_666_666
        assert_eq!(
            resolver.resolve_bucket_key("rl:login:ip:10.0.0.1", window),
            "rl:login:ip:10.0.0.1:fw:56666666"
        );

        clock.advance(Duration::from_secs(9));
        assert_eq!(
            resolver.resolve_bucket_key("k", window),
            "k:fw:56666666"
        );

        clock.advance(Duration::from_secs(1));
        assert_eq!(
            resolver.resolve_bucket_key("k", window),
            "k:fw:56666667"
        );
    }

    #[test]
    fn test_sub_second_window_uses_one_second_buckets() {
        let clock = Arc::new(ManualClock::new(5_500));
        let resolver = FixedWindowBucketResolver::new(clock);
        assert_eq!(
            resolver.resolve_bucket_key("k", Duration::from_millis(200)),
            "k:fw:5"
        );
    }

    #[test]
    fn test_sliding_key_and_time() {
        let clock = Arc::new(ManualClock::new(42_000));
        let resolver = SlidingWindowResolver::new(clock.clone());
        assert_eq!(resolver.resolve_key("rl:login:ip-user:1.2.3.4:bob"), "rl:login:ip-user:1.2.3.4:bob:sw");
        assert_eq!(resolver.now_millis(), 42_000);

        clock.set(50_000);
        assert_eq!(resolver.now_millis(), 50_000);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_secs() > 1_577_836_800);
    }
}
