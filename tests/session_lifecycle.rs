use chrono::{Duration, Utc};
use std::sync::Arc;

use nutriplanner_core::clock::{Clock, ManualClock};
use nutriplanner_core::config::Config;
use nutriplanner_core::crypto::password::{CredentialHasher, DigestEngine};
use nutriplanner_core::error::{AppError, Result};
use nutriplanner_core::models::role::{Role, RoleClaims, resolve_role};
use nutriplanner_core::models::user::NewUser;
use nutriplanner_core::services::sessions::SessionStore;
use nutriplanner_core::storage::driver::KeyValueStore;
use nutriplanner_core::storage::memory::MemoryStore;

/// A derivation engine that always reports its primitives unavailable,
/// forcing the security-degraded fallback path.
struct BrokenEngine;

impl DigestEngine for BrokenEngine {
    fn derive(&self, _password: &[u8], _salt: &[u8]) -> Result<[u8; 32]> {
        Err(AppError::Crypto("primitives unavailable".to_string()))
    }
}

struct Fixture {
    store: SessionStore,
    persistent: Arc<MemoryStore>,
    ephemeral: Arc<MemoryStore>,
    clock: ManualClock,
    config: Config,
}

fn fixture_with_hasher(hasher: CredentialHasher) -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let config = Config::default();
    let persistent = Arc::new(MemoryStore::new());
    let ephemeral = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(Utc::now());
    let store = SessionStore::new(
        persistent.clone(),
        ephemeral.clone(),
        hasher,
        Arc::new(clock.clone()),
        config.clone(),
    );
    Fixture {
        store,
        persistent,
        ephemeral,
        clock,
        config,
    }
}

fn fixture() -> Fixture {
    fixture_with_hasher(CredentialHasher::default())
}

fn new_user(email: &str) -> NewUser {
    NewUser {
        email: email.to_string(),
        password: "SecurePass123!".to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        role: Role::User,
    }
}

#[tokio::test]
async fn register_then_login_round_trip() {
    let fx = fixture();

    let registered = fx
        .store
        .register_user(new_user("alice@example.com"))
        .await
        .expect("registration succeeds");
    assert_eq!(registered.email, "alice@example.com");
    assert_eq!(registered.role, Role::User);
    assert!(registered.last_login_at.is_none());

    let logged_in = fx
        .store
        .login_user("alice@example.com", "SecurePass123!")
        .await
        .expect("login succeeds");
    assert_eq!(logged_in.id, registered.id);
    assert_eq!(logged_in.last_login_at, Some(fx.clock.now()));
}

#[tokio::test]
async fn login_distinguishes_unknown_user_from_wrong_password() {
    let fx = fixture();
    fx.store
        .register_user(new_user("alice@example.com"))
        .await
        .expect("registration succeeds");

    let err = fx
        .store
        .login_user("ghost@example.com", "SecurePass123!")
        .await
        .expect_err("unknown email rejected");
    match err {
        AppError::Authentication(msg) => assert_eq!(msg, "User does not exist"),
        other => panic!("unexpected error: {other}"),
    }

    let err = fx
        .store
        .login_user("alice@example.com", "WrongPass123!")
        .await
        .expect_err("wrong password rejected");
    match err {
        AppError::Authentication(msg) => assert_eq!(msg, "Incorrect password"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let fx = fixture();
    fx.store
        .register_user(new_user("alice@example.com"))
        .await
        .expect("registration succeeds");

    let err = fx
        .store
        .register_user(new_user("alice@example.com"))
        .await
        .expect_err("duplicate rejected");
    match err {
        AppError::Validation(msg) => assert_eq!(msg, "This email is already registered"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn invalid_registration_fields_are_rejected() {
    let fx = fixture();

    assert!(matches!(
        fx.store.register_user(new_user("not-an-email")).await,
        Err(AppError::Validation(_))
    ));

    let mut short_password = new_user("bob@example.com");
    short_password.password = "short".to_string();
    assert!(matches!(
        fx.store.register_user(short_password).await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn session_records_never_contain_credentials() {
    let fx = fixture();
    let user = fx
        .store
        .register_user(new_user("alice@example.com"))
        .await
        .expect("registration succeeds");

    fx.store.save_current_user(&user, false).await;

    let raw = fx
        .ephemeral
        .get(&fx.config.session_key)
        .await
        .expect("read session record")
        .expect("session record present");
    assert!(!raw.contains("password_digest"));
    assert!(!raw.contains("password_salt"));

    // The directory itself does hold the digest, hex encoded.
    let directory = fx
        .persistent
        .get(&fx.config.users_key)
        .await
        .expect("read directory")
        .expect("directory present");
    assert!(directory.contains("password_digest"));
}

#[tokio::test]
async fn ephemeral_session_expires_after_a_day() {
    let fx = fixture();
    let user = fx
        .store
        .register_user(new_user("alice@example.com"))
        .await
        .expect("registration succeeds");

    fx.store.save_current_user(&user, false).await;
    assert_eq!(fx.store.get_current_user().await, Some(user.clone()));
    assert!(fx.store.is_logged_in().await);

    fx.clock.advance(Duration::hours(23));
    assert_eq!(fx.store.get_current_user().await, Some(user));

    fx.clock.advance(Duration::hours(2));
    assert_eq!(fx.store.get_current_user().await, None);

    // Expiry destroys the record; no residual marker in either scope.
    for store in [&fx.ephemeral, &fx.persistent] {
        assert!(store.get(&fx.config.session_key).await.expect("read").is_none());
        assert!(
            store
                .get(&fx.config.session_flag_key)
                .await
                .expect("read")
                .is_none()
        );
    }
}

#[tokio::test]
async fn remembered_session_expires_after_thirty_days() {
    let fx = fixture();
    let user = fx
        .store
        .register_user(new_user("alice@example.com"))
        .await
        .expect("registration succeeds");

    fx.store.save_current_user(&user, true).await;

    fx.clock.advance(Duration::days(29));
    assert_eq!(fx.store.get_current_user().await, Some(user));

    fx.clock.advance(Duration::days(2));
    assert_eq!(fx.store.get_current_user().await, None);
}

#[tokio::test]
async fn session_scopes_are_mutually_exclusive() {
    let fx = fixture();
    let user = fx
        .store
        .register_user(new_user("alice@example.com"))
        .await
        .expect("registration succeeds");

    fx.store.save_current_user(&user, false).await;
    assert!(
        fx.ephemeral
            .get(&fx.config.session_key)
            .await
            .expect("read")
            .is_some()
    );

    fx.store.save_current_user(&user, true).await;
    assert!(
        fx.ephemeral
            .get(&fx.config.session_key)
            .await
            .expect("read")
            .is_none()
    );
    assert!(
        fx.persistent
            .get(&fx.config.session_key)
            .await
            .expect("read")
            .is_some()
    );
}

#[tokio::test]
async fn logout_is_idempotent() {
    let fx = fixture();
    let user = fx
        .store
        .register_user(new_user("alice@example.com"))
        .await
        .expect("registration succeeds");

    fx.store.save_current_user(&user, true).await;
    fx.store.logout().await;
    assert_eq!(fx.store.get_current_user().await, None);
    fx.store.logout().await;
    assert_eq!(fx.store.get_current_user().await, None);
}

#[tokio::test]
async fn degraded_digest_is_flagged_and_upgraded_on_login() {
    // Register while the derivation engine is down: the account is written
    // with the security-degraded fallback digest.
    let broken = fixture_with_hasher(CredentialHasher::new(Arc::new(BrokenEngine)));
    broken
        .store
        .register_user(new_user("alice@example.com"))
        .await
        .expect("registration still succeeds");

    let directory = broken
        .persistent
        .get(&broken.config.users_key)
        .await
        .expect("read directory")
        .expect("directory present");
    let accounts: serde_json::Value = serde_json::from_str(&directory).expect("parse directory");
    let digest = accounts[0]["password_digest"].as_str().expect("digest");
    assert!(digest.len() < 64, "fallback digest is short: {digest}");
    assert_eq!(accounts[0]["legacy_digest"], true);

    // A later session with working primitives verifies against the legacy
    // scheme and transparently re-derives the record with PBKDF2.
    let healthy = SessionStore::new(
        broken.persistent.clone(),
        broken.ephemeral.clone(),
        CredentialHasher::default(),
        Arc::new(broken.clock.clone()),
        broken.config.clone(),
    );
    healthy
        .login_user("alice@example.com", "SecurePass123!")
        .await
        .expect("legacy login succeeds");

    let directory = broken
        .persistent
        .get(&broken.config.users_key)
        .await
        .expect("read directory")
        .expect("directory present");
    let accounts: serde_json::Value = serde_json::from_str(&directory).expect("parse directory");
    let digest = accounts[0]["password_digest"].as_str().expect("digest");
    assert_eq!(digest.len(), 64, "digest re-derived with PBKDF2");
    assert_eq!(accounts[0]["legacy_digest"], false);

    // And the upgraded record still verifies.
    healthy
        .login_user("alice@example.com", "SecurePass123!")
        .await
        .expect("upgraded login succeeds");
}

#[tokio::test]
async fn user_stats_count_roles() {
    let fx = fixture();
    fx.store
        .register_user(new_user("alice@example.com"))
        .await
        .expect("registration succeeds");
    let mut nutritionist = new_user("nina@example.com");
    nutritionist.role = Role::Nutritionist;
    fx.store
        .register_user(nutritionist)
        .await
        .expect("registration succeeds");

    let stats = fx.store.user_stats().await;
    assert_eq!(stats.total_users, 2);
    assert_eq!(stats.role_distribution.get(&Role::User), Some(&1));
    assert_eq!(stats.role_distribution.get(&Role::Nutritionist), Some(&1));
    assert!(stats.current_user.is_none());
}

#[tokio::test]
async fn clear_all_data_wipes_directory_and_session() {
    let fx = fixture();
    let user = fx
        .store
        .register_user(new_user("alice@example.com"))
        .await
        .expect("registration succeeds");
    fx.store.save_current_user(&user, true).await;

    fx.store.clear_all_data().await;
    assert_eq!(fx.store.get_current_user().await, None);
    assert_eq!(fx.store.user_stats().await.total_users, 0);
}

#[test]
fn role_resolution_precedence() {
    // Explicit claim wins over everything.
    let claims = RoleClaims {
        role: Some("nutritionist".to_string()),
        roles: Some(vec!["administrator".to_string()]),
        admin: Some(true),
    };
    assert_eq!(
        resolve_role(Some(Role::Administrator), &claims),
        Role::Nutritionist
    );

    // An administrator marker in the roles list beats the admin flag and
    // the stored role.
    let claims = RoleClaims {
        role: None,
        roles: Some(vec!["editor".to_string(), "administrator".to_string()]),
        admin: Some(false),
    };
    assert_eq!(resolve_role(Some(Role::User), &claims), Role::Administrator);

    // The boolean admin claim comes next.
    let claims = RoleClaims {
        role: None,
        roles: Some(vec!["editor".to_string()]),
        admin: Some(true),
    };
    assert_eq!(resolve_role(Some(Role::User), &claims), Role::Administrator);

    // Then the stored account role.
    let claims = RoleClaims::default();
    assert_eq!(
        resolve_role(Some(Role::Nutritionist), &claims),
        Role::Nutritionist
    );

    // And finally the default.
    assert_eq!(resolve_role(None, &claims), Role::User);

    // An unknown explicit claim falls through to the next rule.
    let claims = RoleClaims {
        role: Some("superuser".to_string()),
        roles: None,
        admin: Some(true),
    };
    assert_eq!(resolve_role(Some(Role::User), &claims), Role::Administrator);
}
