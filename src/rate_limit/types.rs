use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sentinel used for missing ip or username segments
pub const ANONYMOUS: &str = "anonymous";
/// Sentinel used for a missing tenant
pub const PUBLIC_TENANT: &str = "public";

/// Which identity fields compose a rate limit key
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKeyStrategy {
    /// Client IP only
    #[default]
    Ip,
    /// Client IP and username
    IpUsername,
    /// Client IP, username and tenant
    IpUsernameTenant,
}

impl RateLimitKeyStrategy {
    /// Tag embedded in the store key
    pub fn tag(&self) -> &'static str {
        match self {
            RateLimitKeyStrategy::Ip => "ip",
            RateLimitKeyStrategy::IpUsername => "ip-user",
            RateLimitKeyStrategy::IpUsernameTenant => "ip-user-tenant",
        }
    }
}

impl fmt::Display for RateLimitKeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One window of a limiter definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDefinition {
    /// Maximum requests per window
    pub limit: u32,
    /// Window length
    pub duration: Duration,
    /// Identity fields the window is keyed by
    pub key_strategy: RateLimitKeyStrategy,
}

impl WindowDefinition {
    pub fn new(limit: u32, duration: Duration, key_strategy: RateLimitKeyStrategy) -> Self {
        Self {
            limit,
            duration,
            key_strategy,
        }
    }

    /// A window that never applies
    pub fn disabled(key_strategy: RateLimitKeyStrategy) -> Self {
        Self::new(0, Duration::ZERO, key_strategy)
    }

    /// A window is enforced only when both limit and duration are positive
    pub fn is_enabled(&self) -> bool {
        self.limit > 0 && !self.duration.is_zero()
    }

    /// Window length in milliseconds, as handed to the store scripts
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Immutable policy evaluated by the distributed limiter.
///
/// Built per invocation by merging static configuration with call-site
/// overrides (see [`crate::rate_limit::RateLimitPolicy::definition`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterDefinition {
    name: String,
    fixed_window: WindowDefinition,
    sliding_window: WindowDefinition,
}

impl RateLimiterDefinition {
    pub fn new(
        name: impl Into<String>,
        fixed_window: WindowDefinition,
        sliding_window: WindowDefinition,
    ) -> Self {
        Self {
            name: name.into(),
            fixed_window,
            sliding_window,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fixed_window(&self) -> &WindowDefinition {
        &self.fixed_window
    }

    pub fn sliding_window(&self) -> &WindowDefinition {
        &self.sliding_window
    }

    pub fn is_fixed_window_enabled(&self) -> bool {
        self.fixed_window.is_enabled()
    }

    pub fn is_sliding_window_enabled(&self) -> bool {
        self.sliding_window.is_enabled()
    }
}

/// Identity of one limiter invocation.
///
/// Fields are never empty; the key resolver substitutes sentinels and sanitizes
/// every segment before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRequestMetadata {
    pub ip: String,
    pub username: String,
    pub tenant: String,
}

/// Per-request identity captured once at the edge.
///
/// Stored in the request extensions by
/// [`crate::rate_limit::middleware::capture_rate_limit_context`], so it is shared
/// by every limiter check on that request and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitContext {
    ip_address: String,
    tenant: String,
}

impl RateLimitContext {
    pub fn new(ip_address: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            tenant: tenant.into(),
        }
    }

    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_enabled_requires_limit_and_duration() {
        let strategy = RateLimitKeyStrategy::Ip;
        assert!(WindowDefinition::new(5, Duration::from_secs(60), strategy).is_enabled());
        assert!(!WindowDefinition::new(0, Duration::from_secs(60), strategy).is_enabled());
        assert!(!WindowDefinition::new(5, Duration::ZERO, strategy).is_enabled());
        assert!(!WindowDefinition::disabled(strategy).is_enabled());
    }

    #[test]
    fn test_strategy_tags() {
        assert_eq!(RateLimitKeyStrategy::Ip.tag(), "ip");
        assert_eq!(RateLimitKeyStrategy::IpUsername.tag(), "ip-user");
        assert_eq!(
            RateLimitKeyStrategy::IpUsernameTenant.to_string(),
            "ip-user-tenant"
        );
    }

    #[test]
    fn test_strategy_deserializes_from_snake_case() {
        let strategy: RateLimitKeyStrategy = serde_yaml::from_str("ip_username_tenant").unwrap();
        assert_eq!(strategy, RateLimitKeyStrategy::IpUsernameTenant);
    }

    #[test]
    fn test_definition_flags() {
        let definition = RateLimiterDefinition::new(
            "fixed-only",
            WindowDefinition::new(2, Duration::from_secs(30), RateLimitKeyStrategy::Ip),
            WindowDefinition::disabled(RateLimitKeyStrategy::IpUsername),
        );
        assert_eq!(definition.name(), "fixed-only");
        assert!(definition.is_fixed_window_enabled());
        assert!(!definition.is_sliding_window_enabled());
        assert_eq!(definition.fixed_window().duration_ms(), 30_000);
    }
}
