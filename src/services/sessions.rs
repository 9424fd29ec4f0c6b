use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::crypto::password::CredentialHasher;
use crate::error::{AppError, Result};
use crate::models::session::{SessionDurability, SessionRecord};
use crate::models::user::{NewUser, PublicUser, UserAccount, UserStats};
use crate::storage::driver::KeyValueStore;
use crate::validation::auth::{validate_email, validate_password};

/// The value of the session-active marker.
const SESSION_ACTIVE: &str = "active";

/// Owns the authenticated-identity lifecycle.
///
/// Registration and login delegate digest work to `CredentialHasher` on the
/// blocking pool; the session record lives in exactly one of the two
/// storage scopes at a time, picked by the caller's durability choice.
pub struct SessionStore {
    persistent: Arc<dyn KeyValueStore>,
    ephemeral: Arc<dyn KeyValueStore>,
    hasher: CredentialHasher,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl SessionStore {
    /// Creates a session store over the two storage scopes.
    pub fn new(
        persistent: Arc<dyn KeyValueStore>,
        ephemeral: Arc<dyn KeyValueStore>,
        hasher: CredentialHasher,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            persistent,
            ephemeral,
            hasher,
            clock,
            config,
        }
    }

    /// Registers a new account.
    ///
    /// Fails when the email is already registered. The returned snapshot is
    /// redacted; digest and salt never leave the store.
    pub async fn register_user(&self, data: NewUser) -> Result<PublicUser> {
        validate_email(&data.email)?;
        validate_password(&data.password)?;

        let mut users = self.load_users().await?;
        if users.iter().any(|u| u.email == data.email) {
            return Err(AppError::Validation(
                "This email is already registered".to_string(),
            ));
        }

        let hasher = self.hasher.clone();
        let password = data.password.clone();
        let credentials =
            tokio::task::spawn_blocking(move || hasher.create_password_hash(&password))
                .await
                .map_err(|e| AppError::Internal(format!("Digest task failed: {}", e)))??;
        if credentials.degraded {
            tracing::warn!(
                "Account {} registered with a degraded fallback digest",
                data.email
            );
        }

        let account = UserAccount {
            id: Uuid::new_v4().to_string(),
            email: data.email,
            password_digest: credentials.digest,
            password_salt: credentials.salt,
            first_name: data.first_name,
            last_name: data.last_name,
            role: data.role,
            created_at: self.clock.now(),
            last_login_at: None,
            legacy_digest: credentials.degraded,
        };
        let public = PublicUser::from(&account);

        users.push(account);
        self.store_users(&users).await?;

        tracing::info!("✅ User registered: {}", public.id);
        Ok(public)
    }

    /// Verifies credentials and returns the redacted account.
    ///
    /// Distinguishes an unknown email from a wrong password; both surface
    /// as authentication failures, never as thrown faults. On success the
    /// account's `last_login_at` is updated, and a digest written by the
    /// degraded fallback is re-derived with PBKDF2.
    pub async fn login_user(&self, email: &str, password: &str) -> Result<PublicUser> {
        let mut users = self.load_users().await?;
        let Some(index) = users.iter().position(|u| u.email == email) else {
            return Err(AppError::Authentication("User does not exist".to_string()));
        };

        let hasher = self.hasher.clone();
        let candidate = password.to_string();
        let digest = users[index].password_digest.clone();
        let salt = users[index].password_salt.clone();
        let verified =
            tokio::task::spawn_blocking(move || hasher.verify_password(&candidate, &digest, &salt))
                .await
                .map_err(|e| AppError::Internal(format!("Digest task failed: {}", e)))?;
        if !verified {
            return Err(AppError::Authentication("Incorrect password".to_string()));
        }

        if users[index].legacy_digest || CredentialHasher::is_legacy_digest(&users[index].password_digest)
        {
            self.upgrade_legacy_digest(&mut users[index], password).await?;
        }

        users[index].last_login_at = Some(self.clock.now());
        let public = PublicUser::from(&users[index]);
        self.store_users(&users).await?;

        tracing::info!("✅ User logged in: {}", public.id);
        Ok(public)
    }

    /// Re-derives a fallback-written digest with PBKDF2 now that the real
    /// derivation works. Keeps the old digest when derivation degrades again.
    async fn upgrade_legacy_digest(&self, account: &mut UserAccount, password: &str) -> Result<()> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let credentials =
            tokio::task::spawn_blocking(move || hasher.create_password_hash(&password))
                .await
                .map_err(|e| AppError::Internal(format!("Digest task failed: {}", e)))??;
        if credentials.degraded {
            return Ok(());
        }
        account.password_digest = credentials.digest;
        account.password_salt = credentials.salt;
        account.legacy_digest = false;
        tracing::info!("Upgraded legacy digest for user {}", account.id);
        Ok(())
    }

    /// Persists the login session for `user`.
    ///
    /// `remember` selects the persistent scope and the long lifetime;
    /// otherwise the record lives in the ephemeral scope. The scopes are
    /// mutually exclusive, so the other one is cleared first. Write faults
    /// are logged and swallowed.
    pub async fn save_current_user(&self, user: &PublicUser, remember: bool) {
        let durability = if remember {
            SessionDurability::Persistent
        } else {
            SessionDurability::Ephemeral
        };
        if let Err(e) = self.write_session(user, durability).await {
            tracing::error!("Failed to save user session: {}", e);
        }
    }

    async fn write_session(&self, user: &PublicUser, durability: SessionDurability) -> Result<()> {
        let now = self.clock.now();
        let (target, other, lifetime) = match durability {
            SessionDurability::Persistent => (
                &self.persistent,
                &self.ephemeral,
                Duration::days(self.config.persistent_session_days),
            ),
            SessionDurability::Ephemeral => (
                &self.ephemeral,
                &self.persistent,
                Duration::hours(self.config.ephemeral_session_hours),
            ),
        };

        let record = SessionRecord {
            user: user.clone(),
            login_time: now,
            expires_at: now + lifetime,
        };
        let raw = sonic_rs::to_string(&record)?;

        other.delete(&self.config.session_key).await?;
        other.delete(&self.config.session_flag_key).await?;
        target.set(&self.config.session_key, raw).await?;
        target
            .set(&self.config.session_flag_key, SESSION_ACTIVE.to_string())
            .await?;

        tracing::debug!(
            "Session saved for {} until {}",
            record.user.id,
            record.expires_at
        );
        Ok(())
    }

    /// Returns the current identity, or `None` when no live session exists.
    ///
    /// Checks the ephemeral scope first, then the persistent one. An
    /// expired record is destroyed on sight before `None` comes back;
    /// storage faults degrade to `None`.
    pub async fn get_current_user(&self) -> Option<PublicUser> {
        let record = match self.read_session().await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!("Failed to get current user: {}", e);
                return None;
            }
        };

        if self.clock.now() > record.expires_at {
            tracing::debug!("Session for {} expired, logging out", record.user.id);
            self.logout().await;
            return None;
        }

        Some(record.user)
    }

    async fn read_session(&self) -> Result<Option<SessionRecord>> {
        for store in [&self.ephemeral, &self.persistent] {
            let flag = store.get(&self.config.session_flag_key).await?;
            if flag.as_deref() != Some(SESSION_ACTIVE) {
                continue;
            }
            if let Some(raw) = store.get(&self.config.session_key).await? {
                return Ok(Some(sonic_rs::from_str(&raw)?));
            }
        }
        Ok(None)
    }

    /// Whether a live session exists.
    pub async fn is_logged_in(&self) -> bool {
        self.get_current_user().await.is_some()
    }

    /// Clears the session record and marker from both scopes. Idempotent
    /// and best-effort.
    pub async fn logout(&self) {
        for store in [&self.ephemeral, &self.persistent] {
            if let Err(e) = store.delete(&self.config.session_key).await {
                tracing::error!("Failed to clear session record: {}", e);
            }
            if let Err(e) = store.delete(&self.config.session_flag_key).await {
                tracing::error!("Failed to clear session marker: {}", e);
            }
        }
        tracing::debug!("👋 Session cleared");
    }

    /// Directory statistics: totals, per-role counts, current user.
    ///
    /// Storage faults degrade to empty stats.
    pub async fn user_stats(&self) -> UserStats {
        let users = match self.load_users().await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!("Failed to get user data: {}", e);
                Vec::new()
            }
        };

        let mut role_distribution = HashMap::new();
        for user in &users {
            *role_distribution.entry(user.role).or_insert(0) += 1;
        }

        UserStats {
            total_users: users.len(),
            role_distribution,
            current_user: self.get_current_user().await,
        }
    }

    /// Removes every record this store owns, in both scopes. Development
    /// and test reset helper.
    pub async fn clear_all_data(&self) {
        if let Err(e) = self.persistent.delete(&self.config.users_key).await {
            tracing::error!("Failed to clear user directory: {}", e);
        }
        self.logout().await;
    }

    async fn load_users(&self) -> Result<Vec<UserAccount>> {
        match self.persistent.get(&self.config.users_key).await? {
            Some(raw) => Ok(sonic_rs::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn store_users(&self, users: &[UserAccount]) -> Result<()> {
        let raw = sonic_rs::to_string(users)?;
        self.persistent.set(&self.config.users_key, raw).await
    }
}
