//! HTTP surface
//!
//! Account endpoints under `/auth/v1`, each wrapped by a named limiter
//! policy, plus `/health` and `/metrics`.

use crate::auth::{
    AuthService, ChangePasswordRequest, InMemoryRefreshTokenStore, InMemoryUserStore, JwtService, LoginRequest,
    PasswordHasher, PingResponse, RefreshTokenRequest, SignupRequest, TokenResponse,
    TracingEventPublisher,
};
use crate::circuit_breaker::{CircuitBreaker, STORE_BREAKER_NAME};
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::metrics::{metrics_handler, metrics_middleware, MetricsService};
use crate::observability::request_id_middleware;
use crate::rate_limit::{
    capture_rate_limit_context, BruteForceProtectionService, Clock, DistributedRateLimiter,
    Invocation, KeyResolver, RateLimitContext, RateLimitEnforcer, RateLimitKeyStrategy,
    RateLimitPolicy, RateLimitStore, RequestMetadataExtractor, RequestPayload,
};
use axum::{
    extract::{ConnectInfo, FromRef, State},
    http::{header::USER_AGENT, HeaderMap},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub const LOGIN_LIMITER: &str = "login-rate-limiter";
pub const TOKEN_LIMITER: &str = "token-rate-limiter";
pub const SIGNUP_LIMITER: &str = "signup-rate-limiter";
pub const CHANGE_PASSWORD_LIMITER: &str = "change-password-rate-limiter";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub enforcer: RateLimitEnforcer,
    pub extractor: RequestMetadataExtractor,
    pub breaker: CircuitBreaker,
    pub metrics: MetricsService,
}

impl FromRef<AppState> for MetricsService {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

impl AppState {
    /// Wire the limiter, lockout and account services over `store`.
    ///
    /// One circuit breaker guards every store call made by this state.
    pub fn new(
        config: &ServiceConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        metrics: MetricsService,
        hasher: PasswordHasher,
    ) -> Result<Self> {
        let rate_limiting = &config.rate_limiting;
        let breaker = CircuitBreaker::new(STORE_BREAKER_NAME, config.circuit_breaker.clone());

        let refresh_tokens = Arc::new(InMemoryRefreshTokenStore::new(
            config.jwt.refresh_token_ttl(),
            clock.clone(),
        ));
        let extractor = RequestMetadataExtractor::new(rate_limiting.tenant_header.clone());

        let limiter = DistributedRateLimiter::new(
            store.clone(),
            breaker.clone(),
            KeyResolver::with_refresh_tokens(refresh_tokens.clone()),
            clock,
            rate_limiting.metric_tag.clone(),
        );
        let enforcer = RateLimitEnforcer::new(limiter, extractor.clone(), rate_limiting.clone());

        let brute_force = BruteForceProtectionService::new(
            store,
            breaker.clone(),
            rate_limiting.brute_force.limits(),
            rate_limiting.metric_tag.clone(),
        );

        let auth = AuthService::new(
            Arc::new(InMemoryUserStore::new()),
            hasher,
            Arc::new(JwtService::new(&config.jwt)?),
            refresh_tokens,
            brute_force,
            Arc::new(TracingEventPublisher),
        );

        Ok(Self {
            auth,
            enforcer,
            extractor,
            breaker,
            metrics,
        })
    }
}

pub fn login_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(LOGIN_LIMITER)
        .fixed_window_key(RateLimitKeyStrategy::Ip)
        .sliding_window_key(RateLimitKeyStrategy::IpUsername)
}

pub fn token_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(TOKEN_LIMITER)
        .fixed_window_key(RateLimitKeyStrategy::Ip)
        .sliding_window_key(RateLimitKeyStrategy::IpUsername)
}

pub fn signup_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(SIGNUP_LIMITER)
        .fixed_window_key(RateLimitKeyStrategy::Ip)
        .sliding_window_key(RateLimitKeyStrategy::IpUsernameTenant)
}

/// Keyed by the bearer principal; the request body carries no username
pub fn change_password_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(CHANGE_PASSWORD_LIMITER)
        .fixed_window_key(RateLimitKeyStrategy::Ip)
        .sliding_window_key(RateLimitKeyStrategy::IpUsername)
}

/// Build the router with its middleware stack.
///
/// Outer to inner: trace, request timeout, request id, metrics, rate limit
/// context capture.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/auth/v1/login", post(login))
        .route("/auth/v1/refreshToken", post(refresh_token))
        .route("/auth/v1/token", post(refresh_token))
        .route("/auth/v1/signup", post(signup))
        .route("/auth/v1/change-password", post(change_password))
        .route("/auth/v1/ping", get(ping))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(
            state.extractor.clone(),
            capture_rate_limit_context,
        ))
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Identity signals shared by the protected handlers
struct Caller<'a> {
    context: Option<&'a RateLimitContext>,
    headers: &'a HeaderMap,
    remote_addr: Option<SocketAddr>,
}

impl<'a> Caller<'a> {
    fn new(
        context: &'a Option<Extension<RateLimitContext>>,
        headers: &'a HeaderMap,
        connect_info: Option<ConnectInfo<SocketAddr>>,
    ) -> Self {
        Self {
            context: context.as_ref().map(|Extension(context)| context),
            headers,
            remote_addr: connect_info.map(|ConnectInfo(addr)| addr),
        }
    }

    fn ip(&self, extractor: &RequestMetadataExtractor) -> String {
        match self.context {
            Some(context) => context.ip_address().to_string(),
            None => extractor.extract_client_ip(self.headers, self.remote_addr),
        }
    }

    fn invocation(
        &self,
        principal: Option<String>,
        payloads: Vec<RequestPayload<'a>>,
    ) -> Invocation<'a> {
        Invocation {
            context: self.context,
            headers: Some(self.headers),
            remote_addr: self.remote_addr,
            principal,
            payloads,
        }
    }
}

async fn login(
    State(state): State<AppState>,
    context: Option<Extension<RateLimitContext>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>> {
    let caller = Caller::new(&context, &headers, connect_info);
    let ip = caller.ip(&state.extractor);
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
    let invocation = caller.invocation(
        state.auth.principal(&headers),
        vec![RequestPayload::Login(&request)],
    );

    state
        .enforcer
        .enforce(&login_policy(), invocation, || {
            state.auth.login(&ip, user_agent, &request)
        })
        .await
        .map(Json)
}

async fn refresh_token(
    State(state): State<AppState>,
    context: Option<Extension<RateLimitContext>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Json<TokenResponse>> {
    let caller = Caller::new(&context, &headers, connect_info);
    let invocation = caller.invocation(
        state.auth.principal(&headers),
        vec![RequestPayload::RefreshToken(&request)],
    );

    state
        .enforcer
        .enforce(&token_policy(), invocation, || state.auth.refresh(&request))
        .await
        .map(Json)
}

async fn signup(
    State(state): State<AppState>,
    context: Option<Extension<RateLimitContext>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<SignupRequest>,
) -> Result<Json<TokenResponse>> {
    let caller = Caller::new(&context, &headers, connect_info);
    let invocation = caller.invocation(
        state.auth.principal(&headers),
        vec![RequestPayload::Signup(&request)],
    );

    state
        .enforcer
        .enforce(&signup_policy(), invocation, || state.auth.signup(&request))
        .await
        .map(Json)
}

async fn change_password(
    State(state): State<AppState>,
    context: Option<Extension<RateLimitContext>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<Value>> {
    let caller = Caller::new(&context, &headers, connect_info);
    let ip = caller.ip(&state.extractor);
    let invocation = caller.invocation(state.auth.principal(&headers), Vec::new());

    state
        .enforcer
        .enforce(&change_password_policy(), invocation, || {
            state.auth.change_password(&ip, &headers, &request)
        })
        .await?;

    Ok(Json(json!({ "message": "Password changed successfully" })))
}

async fn ping(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<PingResponse>> {
    state.auth.ping(&headers).await.map(Json)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let circuit = state.breaker.state();
    Json(json!({
        "status": "healthy",
        "store_circuit": circuit.as_str(),
    }))
}
