use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_CREDENTIAL_LEN: usize = 100;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<()> {
        require_credential("username", &self.username)?;
        require_credential("password", &self.password)
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Account creation request. Accepts camelCase field names as well.
#[derive(Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    /// Derived from the email address when absent
    #[serde(default)]
    pub username: Option<String>,
    pub email: String,
    pub password: String,
    #[serde(default, alias = "firstName")]
    pub first_name: String,
    #[serde(default, alias = "lastName")]
    pub last_name: String,
    #[serde(default, alias = "phoneNumber")]
    pub phone_number: Option<String>,
}

impl SignupRequest {
    pub fn validate(&self) -> Result<()> {
        if let Some(username) = self.username.as_deref() {
            if username.chars().count() > MAX_CREDENTIAL_LEN {
                return Err(ServiceError::Validation(format!(
                    "username must be at most {} characters",
                    MAX_CREDENTIAL_LEN
                )));
            }
        }

        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ServiceError::Validation(
                "email must be a valid address".to_string(),
            ));
        }

        require_credential("password", &self.password)?;
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for SignupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("phone_number", &self.phone_number)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRequest {
    pub token: String,
}

impl RefreshTokenRequest {
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(ServiceError::Validation("token must not be blank".to_string()));
        }
        Ok(())
    }
}

/// Password rotation for the authenticated user
#[derive(Clone, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(alias = "oldPassword")]
    pub old_password: String,
    #[serde(alias = "newPassword")]
    pub new_password: String,
}

/// Characters accepted besides ASCII letters and digits; at least one is required
const PASSWORD_SPECIALS: &str = "@$!%*?&";

impl ChangePasswordRequest {
    pub fn validate(&self) -> Result<()> {
        if self.old_password.trim().is_empty() {
            return Err(ServiceError::Validation(
                "old_password must not be blank".to_string(),
            ));
        }
        require_credential("new_password", &self.new_password)?;

        let new = self.new_password.as_str();
        if new.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::Validation(format!(
                "new_password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let allowed = new
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c));
        let complex = new.chars().any(|c| c.is_ascii_lowercase())
            && new.chars().any(|c| c.is_ascii_uppercase())
            && new.chars().any(|c| c.is_ascii_digit())
            && new.chars().any(|c| PASSWORD_SPECIALS.contains(c));
        if !allowed || !complex {
            return Err(ServiceError::Validation(format!(
                "new_password must mix upper and lower case letters, digits and one of {}",
                PASSWORD_SPECIALS
            )));
        }

        if self.old_password == self.new_password {
            return Err(ServiceError::Validation(
                "new_password must differ from old_password".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ChangePasswordRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangePasswordRequest")
            .field("old_password", &"[REDACTED]")
            .field("new_password", &"[REDACTED]")
            .finish()
    }
}

/// Issued on login, refresh and signup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Refresh token
    pub token: String,
    pub user_id: String,
}

/// Response of the ping endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub user_id: String,
}

fn require_credential(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::Validation(format!("{} must not be blank", field)));
    }
    if value.chars().count() > MAX_CREDENTIAL_LEN {
        return Err(ServiceError::Validation(format!(
            "{} must be at most {} characters",
            field, MAX_CREDENTIAL_LEN
        )));
    }
    Ok(())
}
