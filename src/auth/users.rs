use crate::error::{Result, ServiceError};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use rand::RngCore;
use std::sync::Arc;

/// Registered account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: String,
    /// Lowercase, unique
    pub username: String,
    /// Lowercase, unique
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    /// Argon2 PHC string
    pub password_hash: String,
}

/// Account storage.
///
/// Lookups are case-insensitive on username and email.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Option<User>;

    async fn exists_by_username(&self, username: &str) -> bool;

    async fn exists_by_email(&self, email: &str) -> bool;

    /// Fails with [`ServiceError::UserAlreadyExists`] on a duplicate username or email
    async fn insert(&self, user: User) -> Result<User>;

    /// Fails with [`ServiceError::UserNotFound`] if the account is gone
    async fn update_password(&self, username: &str, password_hash: String) -> Result<()>;
}

/// In-process user store
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<DashMap<String, User>>,
    /// email -> username
    emails: Arc<DashMap<String, String>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_username(&self, username: &str) -> Option<User> {
        self.users
            .get(&normalize(username))
            .map(|user| user.value().clone())
    }

    async fn exists_by_username(&self, username: &str) -> bool {
        self.users.contains_key(&normalize(username))
    }

    async fn exists_by_email(&self, email: &str) -> bool {
        self.emails.contains_key(&normalize(email))
    }

    async fn insert(&self, mut user: User) -> Result<User> {
        user.username = normalize(&user.username);
        user.email = normalize(&user.email);

        match self.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => {
                return Err(ServiceError::UserAlreadyExists(format!(
                    "email {} is already registered",
                    user.email
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(user.username.clone());
            }
        }

        match self.users.entry(user.username.clone()) {
            Entry::Occupied(_) => {
                self.emails.remove(&user.email);
                Err(ServiceError::UserAlreadyExists(format!(
                    "username {} is taken",
                    user.username
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }

    async fn update_password(&self, username: &str, password_hash: String) -> Result<()> {
        let username = normalize(username);
        match self.users.get_mut(&username) {
            Some(mut user) => {
                user.password_hash = password_hash;
                Ok(())
            }
            None => Err(ServiceError::UserNotFound(username)),
        }
    }
}

/// Argon2id password hashing
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl PasswordHasher {
    /// Hasher with explicit cost parameters
    pub fn with_params(params: Params) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);

        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| ServiceError::Internal(format!("Failed to encode salt: {}", e)))?;

        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServiceError::Internal(format!("Failed to hash password: {}", e)))
    }

    /// `false` for a mismatch or an unparseable hash
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
