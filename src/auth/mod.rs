//! Account flows guarded by the admission layer
//!
//! [`AuthService`] runs login, token refresh, signup, password change and
//! ping against
//! pluggable collaborators: a [`UserStore`], a [`RefreshTokenStore`], an
//! [`EventPublisher`] and the [`BruteForceProtectionService`].

pub mod dto;
pub mod events;
pub mod jwt;
pub mod tokens;
pub mod users;

pub use dto::{
    ChangePasswordRequest, LoginRequest, PingResponse, RefreshTokenRequest, SignupRequest,
    TokenResponse,
};
pub use events::{AuthEvent, EventPublisher, TracingEventPublisher};
pub use jwt::{Claims, JwtService};
pub use tokens::{InMemoryRefreshTokenStore, RefreshToken, RefreshTokenStore};
pub use users::{InMemoryUserStore, PasswordHasher, User, UserStore};

use crate::error::{Result, ServiceError};
use crate::metrics;
use crate::rate_limit::BruteForceProtectionService;
use axum::http::HeaderMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const UNKNOWN_USER_AGENT: &str = "unknown";

/// Login, refresh, signup, password change and ping
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    hasher: PasswordHasher,
    jwt: Arc<JwtService>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    brute_force: BruteForceProtectionService,
    events: Arc<dyn EventPublisher>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        hasher: PasswordHasher,
        jwt: Arc<JwtService>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        brute_force: BruteForceProtectionService,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            users,
            hasher,
            jwt,
            refresh_tokens,
            brute_force,
            events,
        }
    }

    /// Authenticate and issue tokens.
    ///
    /// A locked ip/username pair fails with [`ServiceError::LockedOut`] before
    /// credentials are checked. A failure that trips the lock reports the
    /// lockout instead of the bad credentials.
    pub async fn login(
        &self,
        ip: &str,
        user_agent: Option<&str>,
        request: &LoginRequest,
    ) -> Result<TokenResponse> {
        request.validate()?;

        if let Err(e) = self.brute_force.ensure_allowed(ip, &request.username).await {
            metrics::record_auth_attempt("login", "locked");
            return Err(e);
        }

        let user = match self.authenticate(request).await? {
            Ok(user) => user,
            Err(reason) => return Err(self.login_failed(ip, request, reason).await),
        };

        let refresh = self.refresh_tokens.create(&user.username).await;
        let access_token = self.jwt.issue(&user.username)?;

        self.publish(AuthEvent::UserLoggedIn {
            user_id: user.user_id.clone(),
            ip: ip.to_string(),
            user_agent: user_agent
                .filter(|agent| !agent.trim().is_empty())
                .unwrap_or(UNKNOWN_USER_AGENT)
                .to_string(),
        })
        .await;
        self.brute_force.reset(ip, &request.username).await;

        metrics::record_auth_attempt("login", "success");
        info!(user_id = %user.user_id, ip, "User logged in");

        Ok(TokenResponse {
            access_token,
            token: refresh.token,
            user_id: user.user_id,
        })
    }

    /// Exchange a live refresh token for a new access token.
    ///
    /// The refresh token itself is returned unchanged.
    pub async fn refresh(&self, request: &RefreshTokenRequest) -> Result<TokenResponse> {
        let token = match self.refresh_tokens.find(&request.token).await {
            Some(token) => token,
            None => {
                metrics::record_auth_attempt("refresh", "failure");
                return Err(ServiceError::InvalidToken(
                    "Refresh token not found".to_string(),
                ));
            }
        };

        let token = match self.refresh_tokens.verify_expiration(token).await {
            Ok(token) => token,
            Err(e) => {
                metrics::record_auth_attempt("refresh", "expired");
                return Err(e);
            }
        };

        let user = self
            .users
            .find_by_username(&token.username)
            .await
            .ok_or_else(|| ServiceError::InvalidToken("Refresh token owner not found".to_string()))?;

        let access_token = self.jwt.issue(&user.username)?;
        self.publish(AuthEvent::TokenRefreshed {
            user_id: user.user_id.clone(),
        })
        .await;

        metrics::record_auth_attempt("refresh", "success");
        Ok(TokenResponse {
            access_token,
            token: token.token,
            user_id: user.user_id,
        })
    }

    /// Create an account and sign it in
    pub async fn signup(&self, request: &SignupRequest) -> Result<TokenResponse> {
        request.validate()?;

        let email = request.email.trim().to_lowercase();
        if self.users.exists_by_email(&email).await {
            metrics::record_auth_attempt("signup", "conflict");
            return Err(ServiceError::UserAlreadyExists(format!(
                "email {} is already registered",
                email
            )));
        }

        let username = match request
            .username
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            Some(name) => {
                if self.users.exists_by_username(name).await {
                    metrics::record_auth_attempt("signup", "conflict");
                    return Err(ServiceError::UserAlreadyExists(format!(
                        "username {} is taken",
                        name
                    )));
                }
                name.to_lowercase()
            }
            None => self.generate_username(&email).await,
        };

        let password_hash = self.hash_password(&request.password).await?;
        let user = self
            .users
            .insert(User {
                user_id: Uuid::new_v4().to_string(),
                username,
                email,
                first_name: request.first_name.trim().to_string(),
                last_name: request.last_name.trim().to_string(),
                phone_number: request.phone_number.clone(),
                password_hash,
            })
            .await?;

        let refresh = self.refresh_tokens.create(&user.username).await;
        let access_token = self.jwt.issue(&user.username)?;

        self.publish(AuthEvent::UserSignedUp {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
        })
        .await;

        metrics::record_auth_attempt("signup", "success");
        info!(user_id = %user.user_id, username = %user.username, "User signed up");

        Ok(TokenResponse {
            access_token,
            token: refresh.token,
            user_id: user.user_id,
        })
    }

    /// Replace the bearer token owner's password.
    ///
    /// Guessing the old password is treated like a failed login: it counts
    /// toward the ip/username lockout, and a success clears the counter.
    pub async fn change_password(
        &self,
        ip: &str,
        headers: &HeaderMap,
        request: &ChangePasswordRequest,
    ) -> Result<()> {
        let username = self
            .jwt
            .principal_from_headers(headers)
            .ok_or_else(|| ServiceError::Unauthorized("Missing or invalid access token".to_string()))?;

        if let Err(e) = request.validate() {
            metrics::record_auth_attempt("change_password", "invalid");
            return Err(e);
        }

        if let Err(e) = self.brute_force.ensure_allowed(ip, &username).await {
            metrics::record_auth_attempt("change_password", "locked");
            return Err(e);
        }

        let Some(user) = self.users.find_by_username(&username).await else {
            warn!(username = %username, "Password change for unknown user");
            metrics::record_auth_attempt("change_password", "not_found");
            return Err(ServiceError::UserNotFound(username));
        };

        if !self
            .verify_password(&request.old_password, &user.password_hash)
            .await?
        {
            warn!(ip, user_id = %user.user_id, "Password change rejected: old password mismatch");
            if let Err(e) = self.brute_force.record_failure(ip, &username).await {
                metrics::record_auth_attempt("change_password", "locked");
                return Err(e);
            }
            metrics::record_auth_attempt("change_password", "failure");
            return Err(ServiceError::Unauthorized(
                "Old password does not match".to_string(),
            ));
        }

        let password_hash = self.hash_password(&request.new_password).await?;
        self.users
            .update_password(&user.username, password_hash)
            .await?;
        self.brute_force.reset(ip, &username).await;

        self.publish(AuthEvent::UserPasswordChanged {
            user_id: user.user_id.clone(),
        })
        .await;

        metrics::record_auth_attempt("change_password", "success");
        info!(user_id = %user.user_id, "Password changed");
        Ok(())
    }

    /// User id behind the request's bearer token
    pub async fn ping(&self, headers: &HeaderMap) -> Result<PingResponse> {
        let username = self
            .jwt
            .principal_from_headers(headers)
            .ok_or_else(|| ServiceError::Unauthorized("Missing or invalid access token".to_string()))?;

        let user = self
            .users
            .find_by_username(&username)
            .await
            .ok_or_else(|| ServiceError::Unauthorized("Unknown principal".to_string()))?;

        Ok(PingResponse {
            user_id: user.user_id,
        })
    }

    /// Authenticated principal of a request, if any
    pub fn principal(&self, headers: &HeaderMap) -> Option<String> {
        self.jwt.principal_from_headers(headers)
    }

    /// Outer error for internal failures, inner error for a rejected login
    async fn authenticate(
        &self,
        request: &LoginRequest,
    ) -> Result<std::result::Result<User, &'static str>> {
        let Some(user) = self.users.find_by_username(&request.username).await else {
            return Ok(Err("user_not_found"));
        };

        if self
            .verify_password(&request.password, &user.password_hash)
            .await?
        {
            Ok(Ok(user))
        } else {
            Ok(Err("bad_credentials"))
        }
    }

    async fn login_failed(&self, ip: &str, request: &LoginRequest, reason: &str) -> ServiceError {
        let recorded = self.brute_force.record_failure(ip, &request.username).await;

        self.publish(AuthEvent::UserLoginFailed {
            username: request.username.clone(),
            ip: ip.to_string(),
            reason: reason.to_string(),
        })
        .await;

        warn!(ip, username = %request.username, reason, "Login failed");
        match recorded {
            Err(e) => {
                metrics::record_auth_attempt("login", "locked");
                e
            }
            Ok(()) => {
                metrics::record_auth_attempt("login", "failure");
                ServiceError::Unauthorized("Invalid username or password".to_string())
            }
        }
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| ServiceError::Internal(format!("Password verification failed: {}", e)))
    }

    async fn hash_password(&self, password: &str) -> Result<String> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| ServiceError::Internal(format!("Password hashing failed: {}", e)))?
    }

    /// Email local part, suffixed with a counter until unused
    async fn generate_username(&self, email: &str) -> String {
        let base = email
            .split('@')
            .next()
            .map(str::trim)
            .filter(|local| !local.is_empty())
            .unwrap_or("user")
            .to_string();

        let mut candidate = base.clone();
        let mut counter = 1u32;
        while self.users.exists_by_username(&candidate).await {
            candidate = format!("{}{}", base, counter);
            counter += 1;
        }
        candidate
    }

    async fn publish(&self, event: AuthEvent) {
        let kind = event.kind();
        if let Err(e) = self.events.publish(event).await {
            warn!(kind, error = %e, "Failed to publish auth event");
        }
    }
}
