//! Registration and login over a [`CredentialStore`].

use std::sync::Arc;

use crate::credentials::{normalize_email, CredentialRecord, CredentialStore, StoreError};
use crate::password::{hash_password, verify_password};

pub const MSG_FIELDS_REQUIRED: &str = "All fields required";
pub const MSG_USER_EXISTS: &str = "User already exists";
pub const MSG_INVALID_CREDENTIALS: &str = "Invalid credentials";
pub const MSG_SERVER_ERROR: &str = "Server error";

/// Auth errors. The message shown to users comes from [`AuthError::user_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// A required field is missing or blank
    Validation(String),
    /// The email is already registered
    Duplicate,
    /// Unknown email or wrong password (deliberately indistinguishable)
    InvalidCredentials,
    /// Unexpected backend failure; the detail is logged, never returned
    Server(String),
}

impl AuthError {
    pub fn user_message(&self) -> &str {
        match self {
            AuthError::Validation(msg) => msg,
            AuthError::Duplicate => MSG_USER_EXISTS,
            AuthError::InvalidCredentials => MSG_INVALID_CREDENTIALS,
            AuthError::Server(_) => MSG_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Validation(msg) => write!(f, "Validation error: {msg}"),
            AuthError::Duplicate => write!(f, "Duplicate registration"),
            AuthError::InvalidCredentials => write!(f, "Invalid credentials"),
            AuthError::Server(e) => write!(f, "Server fault: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(_) => AuthError::Duplicate,
            other => AuthError::Server(other.to_string()),
        }
    }
}

/// Registration and login.
///
/// Argon2 is deliberately slow, so hashing and verification run on the
/// blocking pool rather than on a runtime worker.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
}

impl AuthService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Create an account. Name and email must be non-blank; the password
    /// only has to be non-empty and is used exactly as given.
    pub async fn register(
        &self,
        name: Option<&str>,
        email: Option<&str>,
        password: Option<&str>,
    ) -> Result<CredentialRecord, AuthError> {
        let name = required(name.map(str::trim))?;
        let email = normalize_email(required(email)?);
        let password = non_empty(password)?.to_string();

        if self.store.find_by_email(&email)?.is_some() {
            log::debug!("Registration rejected, {email} already exists");
            return Err(AuthError::Duplicate);
        }

        let hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AuthError::Server(e.to_string()))?
            .map_err(|e| AuthError::Server(e.to_string()))?;

        let record = self.store.create(CredentialRecord::new(name, &email, hash))?;
        log::info!("Registered user {} ({})", record.email, record.id);
        Ok(record)
    }

    /// Check credentials and return the matching record.
    pub async fn login(
        &self,
        email: Option<&str>,
        password: Option<&str>,
    ) -> Result<CredentialRecord, AuthError> {
        let email = normalize_email(required(email)?);
        let password = non_empty(password)?.to_string();

        let Some(record) = self.store.find_by_email(&email)? else {
            log::debug!("Login failed for unknown email {email}");
            return Err(AuthError::InvalidCredentials);
        };

        let stored = record.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| AuthError::Server(e.to_string()))?
            .map_err(|e| AuthError::Server(format!("stored hash for {email} unreadable: {e}")))?;

        if !matches {
            log::debug!("Login failed for {email}, password mismatch");
            return Err(AuthError::InvalidCredentials);
        }
        log::info!("User {email} logged in");
        Ok(record)
    }
}

fn required(value: Option<&str>) -> Result<&str, AuthError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AuthError::Validation(MSG_FIELDS_REQUIRED.to_string())),
    }
}

fn non_empty(value: Option<&str>) -> Result<&str, AuthError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AuthError::Validation(MSG_FIELDS_REQUIRED.to_string())),
    }
}
