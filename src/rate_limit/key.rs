use super::types::{RateLimitKeyStrategy, RateLimitRequestMetadata, ANONYMOUS, PUBLIC_TENANT};
use crate::auth::dto::{LoginRequest, RefreshTokenRequest, SignupRequest};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Prefix of every limiter key
const KEY_PREFIX: &str = "rl";

/// Maps a refresh token to the username that owns it.
///
/// Optional identity signal for refresh requests, which carry no username.
#[async_trait]
pub trait RefreshTokenLookup: Send + Sync {
    async fn username_for_token(&self, token: &str) -> Option<String>;
}

/// Known request shapes that may carry a username signal
#[derive(Debug, Clone, Copy)]
pub enum RequestPayload<'a> {
    Login(&'a LoginRequest),
    Signup(&'a SignupRequest),
    RefreshToken(&'a RefreshTokenRequest),
    /// Bare identifier argument; only used when it looks like an email address
    Identifier(&'a str),
}

impl<'a> RequestPayload<'a> {
    /// Username carried directly by the payload, without any lookup
    pub fn username(&self) -> Option<&'a str> {
        match *self {
            RequestPayload::Login(request) => Some(request.username.as_str()),
            RequestPayload::Signup(request) => request
                .username
                .as_deref()
                .filter(|name| !name.trim().is_empty())
                .or(Some(request.email.as_str())),
            RequestPayload::RefreshToken(_) => None,
            RequestPayload::Identifier(value) => value.contains('@').then_some(value),
        }
    }
}

/// Builds canonical limiter keys and extracts identity signals from payloads
#[derive(Clone, Default)]
pub struct KeyResolver {
    refresh_tokens: Option<Arc<dyn RefreshTokenLookup>>,
}

impl KeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that can map refresh tokens back to their owner
    pub fn with_refresh_tokens(refresh_tokens: Arc<dyn RefreshTokenLookup>) -> Self {
        Self {
            refresh_tokens: Some(refresh_tokens),
        }
    }

    /// Build the store key for a limiter, strategy and identity.
    ///
    /// Every segment is sanitized, so identities differing only in case or
    /// surrounding whitespace collapse onto the same key.
    pub fn resolve(
        &self,
        limiter_name: &str,
        strategy: RateLimitKeyStrategy,
        metadata: &RateLimitRequestMetadata,
    ) -> String {
        let limiter = sanitize(limiter_name);
        let ip = sanitize(&metadata.ip);

        match strategy {
            RateLimitKeyStrategy::Ip => {
                format!("{KEY_PREFIX}:{limiter}:{}:{ip}", strategy.tag())
            }
            RateLimitKeyStrategy::IpUsername => format!(
                "{KEY_PREFIX}:{limiter}:{}:{ip}:{}",
                strategy.tag(),
                sanitize(&metadata.username)
            ),
            RateLimitKeyStrategy::IpUsernameTenant => format!(
                "{KEY_PREFIX}:{limiter}:{}:{ip}:{}:{}",
                strategy.tag(),
                sanitize(&metadata.username),
                sanitize(&metadata.tenant)
            ),
        }
    }

    /// Build metadata, substituting sentinels for blank fields
    pub fn build_metadata(&self, ip: &str, tenant: &str, username: &str) -> RateLimitRequestMetadata {
        RateLimitRequestMetadata {
            ip: non_blank_or(ip, ANONYMOUS),
            username: non_blank_or(username, ANONYMOUS),
            tenant: non_blank_or(tenant, PUBLIC_TENANT),
        }
    }

    /// First username signal found in the payloads, lowercased and trimmed
    pub async fn extract_username(&self, payloads: &[RequestPayload<'_>]) -> Option<String> {
        for payload in payloads {
            let candidate = match payload {
                RequestPayload::RefreshToken(request) => self.username_for_refresh(request).await,
                other => other.username().map(str::to_string),
            };

            if let Some(name) = candidate.filter(|name| !name.trim().is_empty()) {
                return Some(name.trim().to_lowercase());
            }
        }
        None
    }

    async fn username_for_refresh(&self, request: &RefreshTokenRequest) -> Option<String> {
        match &self.refresh_tokens {
            Some(lookup) => lookup.username_for_token(&request.token).await,
            None => {
                debug!("No refresh token lookup configured, skipping username resolution");
                None
            }
        }
    }
}

/// Normalize one key segment.
///
/// Lowercases and trims, then replaces anything outside `[a-z0-9@._-]` with `_`.
/// The key separator `:` is never allowed through.
pub fn sanitize(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return ANONYMOUS.to_string();
    }

    trimmed
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '@' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

fn non_blank_or(value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}
