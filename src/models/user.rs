use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::role::Role;

/// A stored user account.
///
/// `password_digest` and `password_salt` are opaque hex strings produced by
/// `CredentialHasher`; nothing outside the hasher interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// The unique identifier for the account.
    pub id: String,
    /// The account's email address, unique across the directory.
    pub email: String,
    /// The hex-encoded password digest.
    pub password_digest: String,
    /// The hex-encoded salt the digest was derived under.
    pub password_salt: String,
    /// The user's first name.
    pub first_name: String,
    /// The user's last name.
    pub last_name: String,
    /// The account's stored role.
    pub role: Role,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account last logged in.
    pub last_login_at: Option<DateTime<Utc>>,
    /// Set when the digest was written by the degraded fallback hash;
    /// cleared once the record is re-derived with PBKDF2 on login.
    #[serde(default)]
    pub legacy_digest: bool,
}

/// A user snapshot with credential material stripped.
///
/// The only user shape that leaves the session store; safe to hand to
/// collaborators and to embed in session records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&UserAccount> for PublicUser {
    fn from(account: &UserAccount) -> Self {
        Self {
            id: account.id.clone(),
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            role: account.role,
            created_at: account.created_at,
            last_login_at: account.last_login_at,
        }
    }
}

/// The payload for a registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub role: Role,
}

/// Directory statistics.
#[derive(Debug, Clone, Default)]
pub struct UserStats {
    /// Number of registered accounts.
    pub total_users: usize,
    /// Account count per role.
    pub role_distribution: HashMap<Role, usize>,
    /// The currently logged-in user, if any.
    pub current_user: Option<PublicUser>,
}
