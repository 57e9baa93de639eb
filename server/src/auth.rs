//! Authentication collaborator.
//!
//! The session layer only needs two questions answered: may this user register
//! and may this user log in. [`AuthProvider`] is that narrow interface; a real
//! deployment backs it with a credential store. [`InMemoryAuthProvider`] keeps
//! accounts in process memory and enforces the same validation rules.

use log::{debug, info};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Profile identity issued by the provider. Distinct from the in-world
/// player identity, which is per connection.
pub type ProfileId = u64;

/// Successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub profile_id: ProfileId,
    pub username: String,
    /// Human readable outcome relayed to the client.
    pub message: String,
}

/// Reasons an authentication request is refused. The `Display` text is sent
/// to the client verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Username must be at least 3 characters")]
    UsernameTooShort,

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Password must be at least 6 characters")]
    PasswordTooShort,

    #[error("Username already taken")]
    UsernameTaken,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Player not found")]
    PlayerNotFound,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Authentication unavailable: {0}")]
    Unavailable(String),
}

/// Credential verification consumed by the session layer.
pub trait AuthProvider: Send + Sync + 'static {
    fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthGrant, AuthError>> + Send;

    fn login(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthGrant, AuthError>> + Send;
}

pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    hash_password(password) == hash
}

/// Checks a registration request against the provider contract.
pub fn validate_registration(username: &str, email: &str, password: &str) -> Result<(), AuthError> {
    if username.trim().chars().count() < MIN_USERNAME_LEN {
        return Err(AuthError::UsernameTooShort);
    }
    if email.trim().is_empty() || !email.contains('@') {
        return Err(AuthError::InvalidEmail);
    }
    if password.trim().is_empty() || password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::PasswordTooShort);
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct Account {
    id: ProfileId,
    username: String,
    password_hash: String,
    logins: u32,
}

#[derive(Debug, Default)]
struct Accounts {
    next_id: ProfileId,
    by_username: HashMap<String, Account>,
    /// email -> username
    emails: HashMap<String, String>,
}

/// Process-local account store.
#[derive(Debug, Default)]
pub struct InMemoryAuthProvider {
    accounts: Mutex<Accounts>,
}

impl InMemoryAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|accounts| accounts.by_username.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Accounts>, AuthError> {
        self.accounts
            .lock()
            .map_err(|_| AuthError::Unavailable("account store poisoned".to_string()))
    }

    fn register_account(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthGrant, AuthError> {
        validate_registration(username, email, password)?;

        // Uniqueness check and insert share one critical section so two
        // concurrent registrations of a name cannot both pass.
        let mut accounts = self.lock()?;
        if accounts.by_username.contains_key(username) {
            debug!("Username already taken: {}", username);
            return Err(AuthError::UsernameTaken);
        }
        if accounts.emails.contains_key(email) {
            debug!("Email already registered: {}", email);
            return Err(AuthError::EmailTaken);
        }

        accounts.next_id += 1;
        let account = Account {
            id: accounts.next_id,
            username: username.to_string(),
            password_hash: hash_password(password),
            logins: 0,
        };
        let grant = AuthGrant {
            profile_id: account.id,
            username: account.username.clone(),
            message: "Registration successful".to_string(),
        };
        accounts
            .emails
            .insert(email.to_string(), username.to_string());
        accounts.by_username.insert(username.to_string(), account);

        info!("Registered {} (profile {})", username, grant.profile_id);
        Ok(grant)
    }

    fn login_account(&self, username: &str, password: &str) -> Result<AuthGrant, AuthError> {
        let mut accounts = self.lock()?;
        let account = accounts
            .by_username
            .get_mut(username)
            .ok_or(AuthError::PlayerNotFound)?;

        if !verify_password(password, &account.password_hash) {
            debug!("Invalid password for {}", username);
            return Err(AuthError::InvalidPassword);
        }

        account.logins += 1;
        info!(
            "Login successful: {} (profile {}, login #{})",
            username, account.id, account.logins
        );
        Ok(AuthGrant {
            profile_id: account.id,
            username: account.username.clone(),
            message: "Login successful".to_string(),
        })
    }
}

impl AuthProvider for InMemoryAuthProvider {
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthGrant, AuthError> {
        self.register_account(username, email, password)
    }

    async fn login(&self, username: &str, password: &str) -> Result<AuthGrant, AuthError> {
        self.login_account(username, password)
    }
}
