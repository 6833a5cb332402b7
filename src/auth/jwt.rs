use crate::config::JwtConfig;
use crate::error::{Result, ServiceError};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{
    decode, encode, get_current_timestamp, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// JWT claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// HS256 access token issuance and validation
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
    ttl: Duration,
}

impl JwtService {
    /// Create a new JWT service from configuration
    pub fn new(config: &JwtConfig) -> Result<Self> {
        let secret = config.secret.expose_secret();
        if secret.trim().is_empty() {
            return Err(ServiceError::Config("JWT secret is required".to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            ttl: config.access_token_ttl(),
        })
    }

    /// Sign an access token for `username`
    pub fn issue(&self, username: &str) -> Result<String> {
        let now = get_current_timestamp();
        let claims = Claims {
            sub: username.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Verify signature, expiry and issuer
    pub fn validate(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| ServiceError::InvalidToken(format!("Token validation failed: {}", e)))
    }

    /// Subject of a valid bearer token, if the request carries one
    pub fn principal_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        let token = extract_bearer(headers).ok()?;
        match self.validate(&token) {
            Ok(claims) => Some(claims.sub),
            Err(e) => {
                debug!(error = %e, "Ignoring invalid bearer token");
                None
            }
        }
    }
}

/// Extract the token from an `Authorization: Bearer` header
pub fn extract_bearer(headers: &HeaderMap) -> Result<String> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ServiceError::Unauthorized("Missing authorization header".to_string()))?;

    let value = value
        .to_str()
        .map_err(|_| ServiceError::InvalidToken("Invalid authorization header".to_string()))?;

    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            ServiceError::InvalidToken("Authorization header must start with 'Bearer '".to_string())
        })
}
