use super::lua_scripts::{BRUTE_FORCE_SCRIPT, FIXED_WINDOW_SCRIPT, SLIDING_WINDOW_SCRIPT};
use super::store::{BruteForceKeys, BruteForceLimits, BruteForceMode, RateLimitStore, StoreError};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use tracing::debug;
use uuid::Uuid;

/// Redis-backed store executing the limiter scripts.
///
/// `ConnectionManager` multiplexes one connection and is cheap to clone, so
/// concurrent requests never serialize on a process-local lock.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    fixed_window: Script,
    sliding_window: Script,
    brute_force: Script,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            fixed_window: Script::new(FIXED_WINDOW_SCRIPT),
            sliding_window: Script::new(SLIDING_WINDOW_SCRIPT),
            brute_force: Script::new(BRUTE_FORCE_SCRIPT),
        }
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut connection = self.connection.clone();
        redis::cmd("PING").query_async(&mut connection).await
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn fixed_window(&self, key: &str, limit: u32, window_ms: u64) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let verdict: i64 = self
            .fixed_window
            .key(key)
            .arg(limit)
            .arg(window_ms)
            .invoke_async(&mut connection)
            .await?;

        debug!(key, limit, window_ms, verdict, "Fixed window script executed");
        Ok(verdict == 1)
    }

    async fn sliding_window(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let verdict: i64 = self
            .sliding_window
            .key(key)
            .arg(limit)
            .arg(window_ms)
            .arg(now_ms)
            .arg(member)
            .invoke_async(&mut connection)
            .await?;

        debug!(key, limit, window_ms, now_ms, verdict, "Sliding window script executed");
        Ok(verdict == 1)
    }

    async fn brute_force(
        &self,
        keys: &BruteForceKeys,
        limits: BruteForceLimits,
        mode: BruteForceMode,
    ) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let verdict: i64 = self
            .brute_force
            .key(&keys.attempts)
            .key(&keys.lock)
            .arg(limits.max_attempts)
            .arg(limits.window_ms)
            .arg(limits.lockout_ms)
            .arg(mode.as_str())
            .invoke_async(&mut connection)
            .await?;

        debug!(
            attempts_key = %keys.attempts,
            mode = mode.as_str(),
            verdict,
            "Brute-force script executed"
        );
        Ok(verdict == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running Redis instance
    // They are ignored by default. Run with: cargo test -- --ignored

    const REDIS_URL: &str = "redis://127.0.0.1:6379";

    fn unique(prefix: &str) -> String {
        format!("test:{}:{}", prefix, rand::random::<u32>())
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_fixed_window() {
        let store = RedisStore::connect(REDIS_URL)
            .await
            .expect("Failed to connect to Redis");
        let key = unique("fw");

        assert!(store.fixed_window(&key, 2, 30_000).await.unwrap());
        assert!(store.fixed_window(&key, 2, 30_000).await.unwrap());
        assert!(!store.fixed_window(&key, 2, 30_000).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_sliding_window() {
        let store = RedisStore::connect(REDIS_URL)
            .await
            .expect("Failed to connect to Redis");
        let key = unique("sw");
        let now = 1_700_000_000_000;

        for offset in 0..3 {
            assert!(store.sliding_window(&key, 3, 120_000, now + offset).await.unwrap());
        }
        assert!(!store.sliding_window(&key, 3, 120_000, now + 3).await.unwrap());
        assert!(store.sliding_window(&key, 3, 120_000, now + 120_001).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_brute_force() {
        let store = RedisStore::connect(REDIS_URL)
            .await
            .expect("Failed to connect to Redis");
        let composite = unique("bf");
        let keys = BruteForceKeys {
            attempts: format!("security:bf:{{{}}}:attempts", composite),
            lock: format!("security:bf:{{{}}}:lock", composite),
        };
        let limits = BruteForceLimits {
            max_attempts: 3,
            window_ms: 300_000,
            lockout_ms: 900_000,
        };

        assert!(store.brute_force(&keys, limits, BruteForceMode::Fail).await.unwrap());
        assert!(store.brute_force(&keys, limits, BruteForceMode::Fail).await.unwrap());
        assert!(!store.brute_force(&keys, limits, BruteForceMode::Fail).await.unwrap());
        assert!(!store.brute_force(&keys, limits, BruteForceMode::Check).await.unwrap());
        assert!(store.brute_force(&keys, limits, BruteForceMode::Reset).await.unwrap());
        assert!(store.brute_force(&keys, limits, BruteForceMode::Check).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_connection() {
        let store = RedisStore::connect(REDIS_URL)
            .await
            .expect("Failed to connect to Redis");
        assert!(store.ping().await.is_ok());
    }
}
