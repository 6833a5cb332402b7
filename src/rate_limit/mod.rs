//! Distributed admission control
//!
//! Cross-instance rate limiting and brute-force lockout backed by a shared
//! store:
//!
//! - **Fixed window**: hard counter per `epoch_seconds / window_seconds` bucket
//! - **Sliding window**: timestamps within a moving window, pruned atomically
//! - **Brute force**: failure counter plus lock flag per ip/username pair
//!
//! Every store operation is a single atomic script behind a circuit breaker.
//! When the store is unavailable, checks fail open.
//!
//! # Example
//!
//! ```rust,no_run
//! use sentinel::circuit_breaker::CircuitBreaker;
//! use sentinel::rate_limit::{
//!     DistributedRateLimiter, KeyResolver, RateLimitKeyStrategy, RateLimiterDefinition,
//!     RedisStore, SystemClock, WindowDefinition,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisStore::connect("redis://localhost:6379").await.unwrap();
//!     let limiter = DistributedRateLimiter::new(
//!         Arc::new(store),
//!         CircuitBreaker::new("redis-rate-limiter", Default::default()),
//!         KeyResolver::new(),
//!         Arc::new(SystemClock),
//!         "authservice",
//!     );
//!
//!     let definition = RateLimiterDefinition::new(
//!         "login-rate-limiter",
//!         WindowDefinition::new(5, Duration::from_secs(60), RateLimitKeyStrategy::Ip),
//!         WindowDefinition::new(10, Duration::from_secs(300), RateLimitKeyStrategy::IpUsername),
//!     );
//!     let metadata = limiter.key_resolver().build_metadata("10.0.0.1", "public", "alice");
//!     let allowed = limiter.allow(&definition, &metadata).await;
//!     println!("allowed: {allowed}");
//! }
//! ```

pub mod brute_force;
pub mod key;
pub mod lua_scripts;
pub mod memory;
pub mod metadata;
pub mod middleware;
pub mod redis;
pub mod service;
pub mod store;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use brute_force::BruteForceProtectionService;
pub use key::{KeyResolver, RefreshTokenLookup, RequestPayload};
pub use memory::MemoryStore;
pub use metadata::RequestMetadataExtractor;
pub use middleware::{capture_rate_limit_context, Invocation, RateLimitEnforcer, RateLimitPolicy};
pub use redis::RedisStore;
pub use service::DistributedRateLimiter;
pub use store::{RateLimitStore, StoreError};
pub use types::{
    RateLimitContext, RateLimitKeyStrategy, RateLimitRequestMetadata, RateLimiterDefinition,
    WindowDefinition,
};
pub use window::{Clock, ManualClock, SystemClock};
