use super::key::RequestPayload;
use super::metadata::RequestMetadataExtractor;
use super::service::DistributedRateLimiter;
use super::types::{
    RateLimitContext, RateLimitKeyStrategy, RateLimitRequestMetadata, RateLimiterDefinition,
    WindowDefinition, ANONYMOUS,
};
use crate::config::{RateLimitingConfig, WindowConfig};
use crate::error::{Result, ServiceError};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Axum middleware capturing the [`RateLimitContext`] once per request.
///
/// The context is stored in the request extensions, so it is visible to every
/// handler and limiter check on this request and dropped with it.
pub async fn capture_rate_limit_context(
    State(extractor): State<RequestMetadataExtractor>,
    mut request: Request,
    next: Next,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let context = extractor.capture(request.headers(), remote_addr);

    debug!(
        ip = %context.ip_address(),
        tenant = %context.tenant(),
        "Captured rate limit context"
    );

    request.extensions_mut().insert(context);
    next.run(request).await
}

/// Limiter declaration for one protected operation.
///
/// Numeric overrides apply only when positive; anything else falls back to
/// the configured defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    name: String,
    fixed_window_key: RateLimitKeyStrategy,
    sliding_window_key: RateLimitKeyStrategy,
    fixed_window_limit: i64,
    fixed_window_seconds: i64,
    sliding_window_limit: i64,
    sliding_window_seconds: i64,
}

impl RateLimitPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fixed_window_key: RateLimitKeyStrategy::Ip,
            sliding_window_key: RateLimitKeyStrategy::IpUsername,
            fixed_window_limit: -1,
            fixed_window_seconds: -1,
            sliding_window_limit: -1,
            sliding_window_seconds: -1,
        }
    }

    pub fn fixed_window_key(mut self, strategy: RateLimitKeyStrategy) -> Self {
        self.fixed_window_key = strategy;
        self
    }

    pub fn sliding_window_key(mut self, strategy: RateLimitKeyStrategy) -> Self {
        self.sliding_window_key = strategy;
        self
    }

    pub fn fixed_window_limit(mut self, limit: i64) -> Self {
        self.fixed_window_limit = limit;
        self
    }

    pub fn fixed_window_seconds(mut self, seconds: i64) -> Self {
        self.fixed_window_seconds = seconds;
        self
    }

    pub fn sliding_window_limit(mut self, limit: i64) -> Self {
        self.sliding_window_limit = limit;
        self
    }

    pub fn sliding_window_seconds(mut self, seconds: i64) -> Self {
        self.sliding_window_seconds = seconds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merge the configured defaults with this policy's overrides
    pub fn definition(&self, config: &RateLimitingConfig) -> RateLimiterDefinition {
        RateLimiterDefinition::new(
            self.name.clone(),
            merge_window(
                &config.fixed_window,
                self.fixed_window_limit,
                self.fixed_window_seconds,
                self.fixed_window_key,
            ),
            merge_window(
                &config.sliding_window,
                self.sliding_window_limit,
                self.sliding_window_seconds,
                self.sliding_window_key,
            ),
        )
    }
}

fn merge_window(
    defaults: &WindowConfig,
    limit_override: i64,
    seconds_override: i64,
    key_strategy: RateLimitKeyStrategy,
) -> WindowDefinition {
    let limit = if limit_override > 0 {
        u32::try_from(limit_override).unwrap_or(u32::MAX)
    } else {
        defaults.limit
    };
    let duration = if seconds_override > 0 {
        Duration::from_secs(seconds_override.unsigned_abs())
    } else {
        defaults.duration()
    };
    WindowDefinition::new(limit, duration, key_strategy)
}

/// Per-call inputs to the enforcer
#[derive(Debug, Clone, Default)]
pub struct Invocation<'a> {
    /// Context captured by [`capture_rate_limit_context`], if it ran
    pub context: Option<&'a RateLimitContext>,
    /// Raw headers, used only when no context was captured
    pub headers: Option<&'a HeaderMap>,
    pub remote_addr: Option<SocketAddr>,
    /// Authenticated principal, if any
    pub principal: Option<String>,
    /// Call arguments that may carry a username
    pub payloads: Vec<RequestPayload<'a>>,
}

/// Wraps protected operations with a limiter check.
///
/// Denied calls fail with [`ServiceError::TooManyRequests`] before the
/// operation runs; allowed calls return the operation's result unchanged.
#[derive(Clone)]
pub struct RateLimitEnforcer {
    limiter: DistributedRateLimiter,
    extractor: RequestMetadataExtractor,
    config: Arc<RateLimitingConfig>,
}

impl RateLimitEnforcer {
    pub fn new(
        limiter: DistributedRateLimiter,
        extractor: RequestMetadataExtractor,
        config: RateLimitingConfig,
    ) -> Self {
        Self {
            limiter,
            extractor,
            config: Arc::new(config),
        }
    }

    pub async fn enforce<F, Fut, T>(
        &self,
        policy: &RateLimitPolicy,
        invocation: Invocation<'_>,
        operation: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check(policy, &invocation).await?;
        operation().await
    }

    /// Evaluate `policy` for one invocation without running anything
    pub async fn check(&self, policy: &RateLimitPolicy, invocation: &Invocation<'_>) -> Result<()> {
        let metadata = self.metadata(invocation).await;
        let definition = policy.definition(&self.config);

        if self.limiter.allow(&definition, &metadata).await {
            Ok(())
        } else {
            Err(ServiceError::TooManyRequests(policy.name().to_string()))
        }
    }

    /// Identity used for the limiter keys of this invocation
    pub async fn metadata(&self, invocation: &Invocation<'_>) -> RateLimitRequestMetadata {
        let (ip, tenant) = match invocation.context {
            Some(context) => (context.ip_address().to_string(), context.tenant().to_string()),
            None => {
                debug!("No rate limit context on request, extracting metadata directly");
                let empty = HeaderMap::new();
                let headers = invocation.headers.unwrap_or(&empty);
                (
                    self.extractor
                        .extract_client_ip(headers, invocation.remote_addr),
                    self.extractor.resolve_tenant(headers),
                )
            }
        };

        let username = match self
            .limiter
            .key_resolver()
            .extract_username(&invocation.payloads)
            .await
        {
            Some(username) => username,
            None => invocation
                .principal
                .clone()
                .unwrap_or_else(|| ANONYMOUS.to_string()),
        };

        self.limiter
            .key_resolver()
            .build_metadata(&ip, &tenant, &username)
    }
}
