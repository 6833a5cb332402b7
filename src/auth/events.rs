use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Account lifecycle events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    UserSignedUp {
        user_id: String,
        username: String,
        email: String,
    },
    UserLoggedIn {
        user_id: String,
        ip: String,
        user_agent: String,
    },
    UserLoginFailed {
        username: String,
        ip: String,
        reason: String,
    },
    TokenRefreshed {
        user_id: String,
    },
    UserPasswordChanged {
        user_id: String,
    },
}

impl AuthEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthEvent::UserSignedUp { .. } => "user_signed_up",
            AuthEvent::UserLoggedIn { .. } => "user_logged_in",
            AuthEvent::UserLoginFailed { .. } => "user_login_failed",
            AuthEvent::TokenRefreshed { .. } => "token_refreshed",
            AuthEvent::UserPasswordChanged { .. } => "user_password_changed",
        }
    }
}

/// Sink for [`AuthEvent`]s. Callers log failures and carry on.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: AuthEvent) -> Result<()>;
}

/// Publishes events as structured log lines on the `sentinel::events` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: AuthEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)
            .map_err(|e| ServiceError::Internal(format!("Failed to encode event: {}", e)))?;
        info!(target: "sentinel::events", kind = event.kind(), %payload, "Auth event");
        Ok(())
    }
}
