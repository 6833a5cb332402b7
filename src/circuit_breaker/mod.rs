pub mod breaker;
pub mod retry;
pub mod types;

pub use breaker::CircuitBreaker;
pub use retry::RetryExecutor;
pub use types::{CallError, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, RetryConfig};

/// Name of the breaker shared by the limiter and brute-force services
pub const STORE_BREAKER_NAME: &str = "redis-rate-limiter";
