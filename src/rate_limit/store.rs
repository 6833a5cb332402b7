use crate::circuit_breaker::CallError;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to the shared store.
///
/// Internal only: the limiter and brute-force services turn every
/// `StoreError` into an allow decision plus a warning.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Circuit breaker open, store call skipped")]
    CircuitOpen,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<CallError<StoreError>> for StoreError {
    fn from(err: CallError<StoreError>) -> Self {
        match err {
            CallError::Open => StoreError::CircuitOpen,
            CallError::Timeout(after) => StoreError::Timeout(after),
            CallError::Inner(inner) => inner,
        }
    }
}

/// Operation requested from the brute-force script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BruteForceMode {
    /// Read the lock flag only
    Check,
    /// Count a failed attempt, locking at the threshold
    Fail,
    /// Clear attempts and lock
    Reset,
}

impl BruteForceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BruteForceMode::Check => "check",
            BruteForceMode::Fail => "fail",
            BruteForceMode::Reset => "reset",
        }
    }
}

/// Store keys for one ip/username pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BruteForceKeys {
    pub attempts: String,
    pub lock: String,
}

/// Threshold and TTLs applied by the brute-force script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BruteForceLimits {
    pub max_attempts: u32,
    pub window_ms: u64,
    pub lockout_ms: u64,
}

/// Shared store executing the atomic limiter operations.
///
/// Each method is one indivisible read-modify-write on the store side and
/// returns `true` when the caller may proceed.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request against a fixed-window bucket
    async fn fixed_window(&self, key: &str, limit: u32, window_ms: u64) -> Result<bool, StoreError>;

    /// Count one request against a sliding window ending at `now_ms`
    async fn sliding_window(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StoreError>;

    /// Apply a brute-force operation; `false` means the pair is locked
    async fn brute_force(
        &self,
        keys: &BruteForceKeys,
        limits: BruteForceLimits,
        mode: BruteForceMode,
    ) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names_match_script() {
        assert_eq!(BruteForceMode::Check.as_str(), "check");
        assert_eq!(BruteForceMode::Fail.as_str(), "fail");
        assert_eq!(BruteForceMode::Reset.as_str(), "reset");
    }

    #[test]
    fn test_breaker_errors_flatten() {
        let open: StoreError = CallError::<StoreError>::Open.into();
        assert!(matches!(open, StoreError::CircuitOpen));

        let inner: StoreError = CallError::Inner(StoreError::Unavailable("x".into())).into();
        assert!(matches!(inner, StoreError::Unavailable(_)));
    }
}
