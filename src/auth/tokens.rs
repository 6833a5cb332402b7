use crate::error::{Result, ServiceError};
use crate::rate_limit::key::RefreshTokenLookup;
use crate::rate_limit::window::Clock;
use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Refresh token as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub token: String,
    pub username: String,
    pub expires_at_ms: u64,
}

/// Refresh token persistence. One live token per user.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Issue a fresh token for `username`, replacing any previous one
    async fn create(&self, username: &str) -> RefreshToken;

    /// Look up a token. Blank input finds nothing.
    async fn find(&self, token: &str) -> Option<RefreshToken>;

    /// Reject and delete an expired token
    async fn verify_expiration(&self, token: RefreshToken) -> Result<RefreshToken>;
}

#[derive(Debug, Clone)]
struct Record {
    username: String,
    expires_at_ms: u64,
}

/// In-process token store keyed by SHA-256 digest
#[derive(Clone)]
pub struct InMemoryRefreshTokenStore {
    by_digest: Arc<DashMap<String, Record>>,
    /// username -> digest of its live token
    by_user: Arc<DashMap<String, String>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryRefreshTokenStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            by_digest: Arc::new(DashMap::new()),
            by_user: Arc::new(DashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }

    fn remove(&self, digest: &str) {
        if let Some((_, record)) = self.by_digest.remove(digest) {
            self.by_user
                .remove_if(&record.username, |_, current| current == digest);
        }
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn create(&self, username: &str) -> RefreshToken {
        let token = Uuid::new_v4().to_string();
        let digest = digest(&token);
        let expires_at_ms = self
            .clock
            .now_millis()
            .saturating_add(self.ttl.as_millis() as u64);

        if let Some(previous) = self.by_user.insert(username.to_string(), digest.clone()) {
            self.by_digest.remove(&previous);
        }
        self.by_digest.insert(
            digest,
            Record {
                username: username.to_string(),
                expires_at_ms,
            },
        );

        debug!(username, "Issued refresh token");
        RefreshToken {
            token,
            username: username.to_string(),
            expires_at_ms,
        }
    }

    async fn find(&self, token: &str) -> Option<RefreshToken> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }

        self.by_digest.get(&digest(token)).map(|record| RefreshToken {
            token: token.to_string(),
            username: record.username.clone(),
            expires_at_ms: record.expires_at_ms,
        })
    }

    async fn verify_expiration(&self, token: RefreshToken) -> Result<RefreshToken> {
        if token.expires_at_ms <= self.clock.now_millis() {
            self.remove(&digest(&token.token));
            debug!(username = %token.username, "Deleted expired refresh token");
            return Err(ServiceError::InvalidToken(
                "Refresh token expired, please sign in again".to_string(),
            ));
        }
        Ok(token)
    }
}

#[async_trait]
impl RefreshTokenLookup for InMemoryRefreshTokenStore {
    async fn username_for_token(&self, token: &str) -> Option<String> {
        self.find(token).await.map(|token| token.username)
    }
}

fn digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}
